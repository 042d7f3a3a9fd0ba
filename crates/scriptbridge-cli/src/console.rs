//! Terminal side of a run: answering prompts and echoing the run log.

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use scriptbridge_host::{InputCollector, RunEvent};
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, Stdin},
    sync::Mutex,
};

/// Answers prompts with lines read from `reader`. End of input cancels.
pub struct LineInput<R> {
    reader: Mutex<R>,
}

impl<R> LineInput<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: Mutex::new(reader),
        }
    }
}

impl LineInput<BufReader<Stdin>> {
    pub fn stdin() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()))
    }
}

#[async_trait]
impl<R> InputCollector for LineInput<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    async fn collect(&self, prompt: &str) -> Option<String> {
        let mut line = String::new();
        let mut reader = self.reader.lock().await;
        match reader.read_line(&mut line).await {
            Ok(0) => {
                tracing::debug!(%prompt, "Input closed, cancelling prompt");
                None
            }
            Ok(_) => {
                let trimmed = line.trim_end_matches(['\r', '\n']).len();
                line.truncate(trimmed);
                Some(line)
            }
            Err(e) => {
                tracing::warn!("Failed to read input: {e}");
                None
            }
        }
    }
}

/// Write output chunks and prompts to `out` in log order until the run
/// finishes.
///
/// # Errors
/// Returns error if `out` cannot be written.
pub async fn echo_run<S, W>(events: S, out: &mut W) -> std::io::Result<()>
where
    S: Stream<Item = RunEvent> + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut events = events;
    while let Some(event) = events.next().await {
        match event {
            RunEvent::Output(text) => out.write_all(text.as_bytes()).await?,
            RunEvent::Prompt(prompt) => {
                out.write_all(prompt.as_bytes()).await?;
                out.write_all(b" ").await?;
            }
            RunEvent::Failed(kind) => tracing::debug!(%kind, "Run reported a failure"),
            RunEvent::Finished(_) => break,
        }
        out.flush().await?;
    }
    out.flush().await
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use scriptbridge_core::ErrorKind;
    use scriptbridge_host::RunLog;

    use super::*;

    #[tokio::test]
    async fn test_line_input_answers_then_cancels() {
        let input = LineInput::new(&b"Ada\r\nGrace\n"[..]);

        assert_eq!(input.collect("name?").await.as_deref(), Some("Ada"));
        assert_eq!(input.collect("again?").await.as_deref(), Some("Grace"));
        assert_eq!(input.collect("more?").await, None);
    }

    #[tokio::test]
    async fn test_echo_run_stops_at_finished() {
        let events = futures::stream::iter(vec![
            RunEvent::Output("hello ".into()),
            RunEvent::Prompt("name?".into()),
            RunEvent::Output("Ada\n".into()),
            RunEvent::Failed(ErrorKind::Runtime),
            RunEvent::Finished(Duration::from_millis(3)),
            RunEvent::Output("late".into()),
        ]);

        let mut out = Vec::new();
        echo_run(events, &mut out).await.unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "hello name? Ada\n");
    }

    #[tokio::test]
    async fn test_echo_run_keeps_every_chunk_of_a_long_run() {
        let log = RunLog::new(256);
        let events = log.follow();

        let mut expected = String::new();
        log.push_prompt("go?");
        expected.push_str("go? ");
        for i in 0..25_000 {
            let line = format!("line {i}\n");
            expected.push_str(&line);
            log.push_output(line);
        }
        log.push_finished(Duration::from_millis(1));

        let mut out = Vec::new();
        echo_run(events, &mut out).await.unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), expected);
    }
}
