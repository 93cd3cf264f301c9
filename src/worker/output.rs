//! Child process output capture for pipeline steps

use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::process::Child;

/// Most lines kept when output is turned into failure detail
pub(crate) const OUTPUT_TAIL_LINES: usize = 50;

/// Stream stdout+stderr from a child process, calling `on_output` for each line.
///
/// Returns all collected lines. Streams that were not piped are skipped.
pub(crate) async fn stream_child_output(
    child: &mut Child,
    on_output: &(dyn Fn(String) + Send + Sync),
) -> Vec<String> {
    let mut stderr_reader = child.stderr.take().map(|s| LineReader::new(BufReader::new(s)));
    let mut stdout_reader = child.stdout.take().map(|s| LineReader::new(BufReader::new(s)));

    let mut all_output = Vec::new();
    let mut stderr_done = stderr_reader.is_none();
    let mut stdout_done = stdout_reader.is_none();

    while !stderr_done || !stdout_done {
        tokio::select! {
            line = next_line(&mut stderr_reader), if !stderr_done => {
                match line {
                    Some(line) => {
                        on_output(line.clone());
                        all_output.push(line);
                    }
                    None => stderr_done = true,
                }
            }
            line = next_line(&mut stdout_reader), if !stdout_done => {
                match line {
                    Some(line) => {
                        on_output(line.clone());
                        all_output.push(line);
                    }
                    None => stdout_done = true,
                }
            }
        }
    }

    all_output
}

async fn next_line<R>(reader: &mut Option<LineReader<R>>) -> Option<String>
where
    R: AsyncBufRead + Unpin,
{
    match reader {
        Some(lines) => lines.next_line().await,
        None => None,
    }
}

/// Line splitter that decodes lossily and keeps partial lines across
/// cancellation.
///
/// `Lines` fails on invalid UTF-8, and a stream abandoned on error leaves the
/// child blocked on a full pipe. Bytes read before a `select!` branch loses
/// stay in `buf` for the next call.
pub(crate) struct LineReader<R> {
    reader: R,
    buf: Vec<u8>,
}

impl<R: AsyncBufRead + Unpin> LineReader<R> {
    pub(crate) fn new(reader: R) -> Self {
        Self {
            reader,
            buf: Vec::new(),
        }
    }

    /// Next line without its terminator; `None` at end of stream
    pub(crate) async fn next_line(&mut self) -> Option<String> {
        match self.reader.read_until(b'\n', &mut self.buf).await {
            Ok(0) if self.buf.is_empty() => None,
            Ok(_) => {
                if self.buf.last() == Some(&b'\n') {
                    self.buf.pop();
                    if self.buf.last() == Some(&b'\r') {
                        self.buf.pop();
                    }
                }
                let line = String::from_utf8_lossy(&self.buf).into_owned();
                self.buf.clear();
                Some(line)
            }
            Err(_) => None,
        }
    }
}

/// Last `OUTPUT_TAIL_LINES` non-blank lines
pub(crate) fn tail_lines(lines: &[String]) -> Vec<String> {
    let kept: Vec<&String> = lines.iter().filter(|l| !l.trim().is_empty()).collect();
    let start = kept.len().saturating_sub(OUTPUT_TAIL_LINES);
    kept[start..].iter().map(|l| l.trim_end().to_string()).collect()
}
