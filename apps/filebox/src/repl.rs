//! Interactive command loop.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;
use filebox_client::{Client, ClientError, Command, CommandError};
use filebox_protocol::final_component;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite};

const PROMPT: &str = ">> ";

/// Reads commands from `input` until `quit` or end of input.
///
/// Downloads land in `download_dir` under the final component of the
/// requested name. Returns an error once the connection is unusable.
pub async fn run<S, I, O>(
    client: &mut Client<S>,
    input: I,
    out: &mut O,
    download_dir: &Path,
) -> anyhow::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
    I: AsyncBufRead + Unpin,
    O: Write,
{
    let mut lines = input.lines();
    loop {
        write!(out, "{PROMPT}")?;
        out.flush()?;
        let Some(line) = lines.next_line().await.context("cannot read input")? else {
            break;
        };

        let command = match line.parse::<Command>() {
            Ok(command) => command,
            Err(CommandError::Empty) => continue,
            Err(CommandError::UnknownOperation(_)) => {
                writeln!(out, "Wrong operation, please try again")?;
                continue;
            }
            Err(e) => {
                writeln!(out, "{e}")?;
                continue;
            }
        };

        let outcome = match command {
            Command::Quit => break,
            Command::Upload(path) => {
                write!(out, "{path} is being uploaded... ")?;
                out.flush()?;
                client
                    .upload(Path::new(&path))
                    .await
                    .map(|bytes| format!("Done ({bytes} bytes)\n"))
            }
            Command::Download(name) => {
                let Some(dest) = local_destination(download_dir, &name) else {
                    writeln!(out, "invalid file name {name:?}")?;
                    continue;
                };
                write!(out, "{name} is being downloaded... ")?;
                out.flush()?;
                client
                    .download(&name, &dest)
                    .await
                    .map(|bytes| format!("Done ({bytes} bytes)\n"))
            }
            Command::List => client.list().await.map(|entries| {
                entries
                    .iter()
                    .map(|entry| format!("{:>12}  {}\n", entry.size, entry.name))
                    .collect::<String>()
            }),
        };

        match outcome {
            Ok(text) => write!(out, "{text}")?,
            Err(e) => {
                writeln!(out)?;
                writeln!(out, "error: {e}")?;
                if e.is_fatal() {
                    return Err(lost(e));
                }
            }
        }
    }

    writeln!(out, "Goodbye!")?;
    Ok(())
}

fn local_destination(dir: &Path, name: &str) -> Option<PathBuf> {
    final_component(name).map(|file| dir.join(file))
}

fn lost(e: ClientError) -> anyhow::Error {
    anyhow::Error::new(e).context("connection lost")
}
