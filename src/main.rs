//! Command-line driver: run one generate request from a config file.
//!
//! ```text
//! ollama-generate [--config PATH] [--system TEXT] PROMPT...
//! ```

use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use ollama_generate::inference::{find_config_path, load_config, ChatMessage};
use ollama_generate::node::{GenerateInputs, GenerateNode};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Config file (default: `OLLAMA_GENERATE_CONFIG` or `ollama-generate.yaml`
    /// found from the working directory upward)
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// System prompt prepended to the conversation
    #[arg(short, long)]
    system: Option<String>,
    /// Prompt words, joined with spaces
    #[arg(required = true)]
    prompt: Vec<String>,
}

/// Prints only the not-yet-printed tail of a growing reply.
///
/// The first write error stops all further output and is kept for `finish`.
struct TailWriter<W: Write> {
    out: W,
    printed: usize,
    error: Option<io::Error>,
}

impl<W: Write> TailWriter<W> {
    fn new(out: W) -> Self {
        Self {
            out,
            printed: 0,
            error: None,
        }
    }

    fn update(&mut self, text: &str) {
        if self.error.is_some() {
            return;
        }
        let Some(tail) = text.get(self.printed..) else {
            return;
        };
        match self
            .out
            .write_all(tail.as_bytes())
            .and_then(|()| self.out.flush())
        {
            Ok(()) => self.printed = text.len(),
            Err(e) => self.error = Some(e),
        }
    }

    fn finish(self) -> io::Result<W> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.out),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    ollama_generate::init_tracing();

    let args = Args::parse();

    let config_path = match args.config {
        Some(path) => path,
        None => find_config_path(&std::env::current_dir()?)?,
    };
    let config = load_config(&config_path)?;
    config.validate()?;
    tracing::info!(config = %config_path.display(), model = %config.model, "loaded config");

    let node = GenerateNode::new(config)?;
    if !node.client().health_check().await? {
        tracing::warn!(host = %node.client().host(), "Ollama did not answer the health check");
    }

    let inputs = GenerateInputs {
        system_prompt: args.system,
        messages: vec![ChatMessage::user(args.prompt.join(" "))],
        ..Default::default()
    };

    let mut writer = TailWriter::new(io::stdout());
    let outputs = node.process(inputs, |text| writer.update(text)).await?;
    let mut stdout = writer
        .finish()
        .context("failed to write generated text to stdout")?;
    writeln!(stdout)?;

    if let Some(advanced) = &outputs.advanced {
        eprintln!(
            "eval_count={} eval_duration={}ns prompt_eval_count={} total_duration={}ns tokens_per_second={:.2}",
            advanced.eval_count,
            advanced.eval_duration,
            advanced.prompt_eval_count,
            advanced.total_duration,
            advanced.tokens_per_second,
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Accepts `limit` bytes, then fails every write.
    #[derive(Debug)]
    struct LimitedWriter {
        written: Vec<u8>,
        limit: usize,
    }

    impl Write for LimitedWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.written.len() + buf.len() > self.limit {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed"));
            }
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_parse_prompt_and_flags() {
        let args = Args::try_parse_from([
            "ollama-generate",
            "-c",
            "cfg.yaml",
            "--system",
            "Be terse.",
            "why",
            "is",
            "the",
            "sky",
            "blue",
        ])
        .unwrap();
        assert_eq!(args.config, Some(PathBuf::from("cfg.yaml")));
        assert_eq!(args.system.as_deref(), Some("Be terse."));
        assert_eq!(args.prompt.join(" "), "why is the sky blue");
    }

    #[test]
    fn test_parse_requires_prompt() {
        assert!(Args::try_parse_from(["ollama-generate", "--config", "cfg.yaml"]).is_err());
    }

    #[test]
    fn test_tail_writer_prints_only_new_text() {
        let mut writer = TailWriter::new(Vec::new());
        writer.update("Hel");
        writer.update("Hello");
        writer.update("Hello");
        writer.update("Hello world");
        let out = writer.finish().unwrap();
        assert_eq!(out, b"Hello world");
    }

    #[test]
    fn test_tail_writer_keeps_first_write_error() {
        let mut writer = TailWriter::new(LimitedWriter {
            written: Vec::new(),
            limit: 5,
        });
        writer.update("Hello");
        writer.update("Hello world");
        writer.update("Hello world, again");

        assert_eq!(writer.out.written, b"Hello");
        let err = writer.finish().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }
}
