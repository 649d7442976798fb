//! Interactive exerciser: a line-oriented shell driving an [`EchoApi`].
//!
//! One command per line, one outstanding call at a time. Call failures are
//! printed and the shell keeps going; only I/O errors on the terminal end
//! the session.

use std::io::Write;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::client::{EchoApi, HttpPinger};
use crate::error::Result;

/// Requests issued by `stress` when no count is given
pub const DEFAULT_STRESS_COUNT: u64 = 10;

const PROMPT: &str = ">>> ";

const HELP: &str = "\
commands:
  ping                      check the server is reachable
  health                    query the health status
  request <text...>         echo the text back (quotes group words)
  faulty                    call a method that fails one time in five
  slow                      call a method with random latency
  stress [method] [count]   repeat slow or faulty calls (default: slow 10)
  http                      POST to the gateway ping route (no token)
  help                      show this message
  exit | quit               leave the shell";

/// What the shell does after a line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

#[derive(Debug, Clone, Copy)]
enum StressMethod {
    Slow,
    Faulty,
}

pub struct Exerciser<C> {
    client: C,
    http: Option<HttpPinger>,
}

impl<C: EchoApi> Exerciser<C> {
    pub fn new(client: C, http: Option<HttpPinger>) -> Self {
        Self { client, http }
    }

    /// Reads commands until `exit`, `quit` or end of input
    pub async fn run<R, W>(&self, input: R, out: &mut W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: Write,
    {
        writeln!(out, "type 'help' for the list of commands")?;
        let mut lines = input.lines();
        loop {
            write!(out, "{}", PROMPT)?;
            out.flush()?;

            let Some(line) = lines.next_line().await? else {
                writeln!(out)?;
                break;
            };
            if self.execute(&line, out).await? == Flow::Exit {
                break;
            }
        }
        Ok(())
    }

    /// Runs a single command line
    pub async fn execute<W: Write>(&self, line: &str, out: &mut W) -> Result<Flow> {
        let words = match shell_words::split(line) {
            Ok(words) => words,
            Err(e) => {
                writeln!(out, "error: {}", e)?;
                return Ok(Flow::Continue);
            }
        };
        let Some((command, rest)) = words.split_first() else {
            return Ok(Flow::Continue);
        };
        let args: Vec<&str> = rest.iter().map(String::as_str).collect();

        match command.as_str() {
            "ping" => match self.client.ping().await {
                Ok(response) => writeln!(out, "status: {}", response.ok)?,
                Err(e) => writeln!(out, "error: {}", e)?,
            },
            "health" => match self.client.health().await {
                Ok(response) => writeln!(out, "alive: {}", response.alive)?,
                Err(e) => writeln!(out, "error: {}", e)?,
            },
            "request" => self.request(&args, out).await?,
            "faulty" => match self.client.faulty().await {
                Ok(_) => writeln!(out, "ok")?,
                Err(e) => writeln!(out, "error: {}", e)?,
            },
            "slow" => {
                let start = std::time::Instant::now();
                match self.client.slow().await {
                    Ok(_) => writeln!(out, "latency: {}ms", start.elapsed().as_millis())?,
                    Err(e) => writeln!(out, "error: {}", e)?,
                }
            }
            "stress" => self.stress(&args, out).await?,
            "http" => self.http(out).await?,
            "help" => writeln!(out, "{}", HELP)?,
            "exit" | "quit" => return Ok(Flow::Exit),
            other => writeln!(out, "unknown command: {} (try 'help')", other)?,
        }

        Ok(Flow::Continue)
    }

    async fn request<W: Write>(&self, args: &[&str], out: &mut W) -> Result<()> {
        if args.is_empty() {
            writeln!(out, "you must specify the contents of the request")?;
            return Ok(());
        }
        match self.client.request(&args.join(" ")).await {
            Ok(response) => writeln!(out, "{}", response.result)?,
            Err(e) => writeln!(out, "error: {}", e)?,
        }
        Ok(())
    }

    async fn stress<W: Write>(&self, args: &[&str], out: &mut W) -> Result<()> {
        let method = match args.first().copied().unwrap_or("slow") {
            "slow" => StressMethod::Slow,
            "faulty" => StressMethod::Faulty,
            _ => {
                writeln!(out, "invalid method name")?;
                return Ok(());
            }
        };
        let count = match args.get(1) {
            None => DEFAULT_STRESS_COUNT,
            Some(raw) => match raw.parse::<u64>() {
                Ok(0) => {
                    writeln!(out, "the number of requests must be greater than zero")?;
                    return Ok(());
                }
                Ok(count) => count,
                Err(_) => {
                    writeln!(out, "Your second parameter must be an integer number")?;
                    return Ok(());
                }
            },
        };

        match method {
            StressMethod::Slow => {
                for i in 1..=count {
                    if let Err(e) = self.client.slow().await {
                        writeln!(out, "error: {}", e)?;
                    }
                    writeln!(out, "progress: {}%", i * 100 / count)?;
                }
                writeln!(out, "done")?;
            }
            StressMethod::Faulty => {
                let mut failures = 0u64;
                for _ in 0..count {
                    if self.client.faulty().await.is_err() {
                        failures += 1;
                    }
                }
                writeln!(out, "error rate: {}%", failures * 100 / count)?;
            }
        }
        Ok(())
    }

    async fn http<W: Write>(&self, out: &mut W) -> Result<()> {
        let Some(pinger) = &self.http else {
            writeln!(out, "no HTTP endpoint specified")?;
            return Ok(());
        };

        match pinger.post_ping().await {
            Ok(response) => {
                writeln!(out, "Status: {}", response.status())?;
                writeln!(out, "--------------")?;
                for (name, value) in response.headers() {
                    writeln!(out, "{}: {}", name, value.to_str().unwrap_or("<binary>"))?;
                }
            }
            Err(e) => writeln!(out, "error: {}", e)?,
        }
        Ok(())
    }
}
