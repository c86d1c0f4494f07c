//! The child-process protocol.
//!
//! The parent prepares the source (shebang stripping and module wrapping),
//! then runs `<path> <args...> compile --stdin --no-module` with
//! `KILN_RUN_AS_HOST=1`. The source goes to the child's stdin, which is then
//! closed. The child writes the raw cache blob to stdout and may write
//! diagnostics to stderr; those are logged and never fail the request.
//!
//! There is no timeout. A child that never exits and never closes stdout
//! hangs the caller.

use std::path::Path;
use std::process::{ExitStatus, Stdio};

use kiln_cache::compiler::prepare_source;
use kiln_cache::{compile, compress, CompileOptions};
use kiln_common::{Compile, KilnError, KilnResult, SourceUnit};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStderr, Command};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::target::{AlternateRuntime, RuntimeTarget};

/// Arguments appended after the runtime's own arguments.
pub const CHILD_ARGS: [&str; 3] = ["compile", "--stdin", "--no-module"];

/// Set to `1` in the child's environment.
pub const RUN_AS_HOST_ENV: &str = "KILN_RUN_AS_HOST";

/// Compiles `unit` for `target`.
///
/// [`RuntimeTarget::Current`] compiles in process with `engine`. For an
/// alternate runtime, `engine` only prepares the source; the blob comes from
/// the child.
pub async fn compile_for_target<E: Compile>(
    engine: &E,
    unit: &SourceUnit,
    target: &RuntimeTarget,
    options: CompileOptions,
) -> KilnResult<Vec<u8>> {
    let runtime = match target {
        RuntimeTarget::Current => return compile(engine, unit, options),
        RuntimeTarget::Alternate(runtime) => runtime,
    };
    let exe = runtime.check()?;
    let source = prepare_source(engine, unit);
    let blob = run_child(exe, runtime, source).await?;
    if options.compress {
        compress(&blob)
    } else {
        Ok(blob)
    }
}

/// How the child finished.
enum Settled {
    /// Stdout reached end of stream first.
    Eof,
    /// The child exited first.
    Exited(ExitStatus),
}

async fn run_child(exe: &Path, runtime: &AlternateRuntime, source: String) -> KilnResult<Vec<u8>> {
    let mut child = Command::new(exe)
        .args(&runtime.args)
        .args(CHILD_ARGS)
        .env(RUN_AS_HOST_ENV, "1")
        .envs(&runtime.env)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| {
            KilnError::subprocess(format!("failed to spawn '{}'", exe.display()), Some(e))
        })?;
    debug!(runtime = %exe.display(), pid = ?child.id(), "spawned alternate runtime");

    let missing = |name: &str| KilnError::subprocess(format!("child {name} was not captured"), None);
    let mut stdin = child.stdin.take().ok_or_else(|| missing("stdin"))?;
    let mut stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;
    let stderr = child.stderr.take().ok_or_else(|| missing("stderr"))?;

    let writer = tokio::spawn(async move {
        stdin.write_all(source.as_bytes()).await?;
        stdin.shutdown().await
        // stdin drops here, closing the pipe
    });
    let diagnostics = tokio::spawn(log_stderr(stderr));

    let mut out = Vec::new();
    let (settled, status) = {
        let read = stdout.read_to_end(&mut out);
        tokio::pin!(read);
        let settled = tokio::select! {
            result = &mut read => {
                result.map_err(|e| stream_error("stdout", e))?;
                Settled::Eof
            }
            status = child.wait() => {
                let status = status.map_err(|e| stream_error("process", e))?;
                // Whatever the child wrote before exiting is still buffered.
                read.await.map_err(|e| stream_error("stdout", e))?;
                Settled::Exited(status)
            }
        };
        let status = match settled {
            Settled::Exited(status) => status,
            Settled::Eof => child.wait().await.map_err(|e| stream_error("process", e))?,
        };
        (settled, status)
    };
    settle_diagnostics(diagnostics).await;

    debug!(
        bytes = out.len(),
        exit = ?status.code(),
        settled_on = match settled {
            Settled::Eof => "eof",
            Settled::Exited(_) => "exit",
        },
        "alternate runtime finished"
    );

    match status.code() {
        None => {
            return Err(KilnError::subprocess(
                "alternate runtime was terminated by a signal",
                None,
            ))
        }
        Some(0) => {}
        Some(code) => {
            return Err(KilnError::subprocess(
                format!("alternate runtime exited with status {code}"),
                None,
            ))
        }
    }
    match writer.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => return Err(stream_error("stdin", e)),
        Err(e) => {
            return Err(KilnError::subprocess(
                format!("stdin writer failed: {e}"),
                None,
            ))
        }
    }
    if out.is_empty() {
        return Err(KilnError::subprocess(
            "alternate runtime produced no output",
            None,
        ));
    }
    Ok(out)
}

async fn log_stderr(stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => warn!(target: "kiln::runtime", "{line}"),
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "stopped reading runtime stderr");
                break;
            }
        }
    }
}

/// Waits for the stderr logger. Its failure is reported, never raised.
async fn settle_diagnostics(task: JoinHandle<()>) {
    if let Err(e) = task.await {
        warn!(error = %e, "runtime stderr logger failed");
    }
}

fn stream_error(stream: &str, e: std::io::Error) -> KilnError {
    KilnError::subprocess(format!("error on child {stream}: {e}"), Some(e))
}
