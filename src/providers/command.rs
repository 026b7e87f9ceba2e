use crate::stages::{Transcriber, Transcript, VideoHost, VideoUpload};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::process::Command;
use tracing::debug;

/// An external tool invocation; `{placeholders}` in args are filled per call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn is_configured(&self) -> bool {
        !self.program.trim().is_empty()
    }

    fn render(&self, vars: &[(&str, &str)]) -> Vec<String> {
        self.args.iter().map(|arg| fill(arg, vars)).collect()
    }
}

/// Replace `{key}` placeholders in one pass; substituted text is not rescanned
fn fill(arg: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(arg.len());
    let mut rest = arg;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let tail = &rest[open..];

        let value = tail.find('}').and_then(|close| {
            let key = &tail[1..close];
            vars.iter()
                .find(|(name, _)| *name == key)
                .map(|(_, value)| (*value, close))
        });

        match value {
            Some((value, close)) => {
                out.push_str(value);
                rest = &tail[close + 1..];
            }
            None => {
                out.push('{');
                rest = &tail[1..];
            }
        }
    }

    out.push_str(rest);
    out
}

/// Run a command to completion and return its stdout
///
/// The child is killed if the returned future is dropped.
pub(crate) async fn run_command(program: &str, args: &[String]) -> Result<String> {
    debug!("Running {} {:?}", program, args);

    let output = Command::new(program)
        .args(args)
        .kill_on_drop(true)
        .output()
        .await
        .with_context(|| format!("failed to run {program}"))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("{} exited with {}: {}", program, output.status, stderr.trim());
    }

    String::from_utf8(output.stdout).with_context(|| format!("{program} wrote non-UTF-8 output"))
}

/// Transcriber backed by a local tool (whisper.cpp, a wrapper script, ...)
///
/// Stdout is either plain transcript text or a JSON object with `text` and
/// an optional `confidence`.
pub struct CommandTranscriber {
    command: CommandSpec,
}

impl CommandTranscriber {
    pub fn new(command: CommandSpec) -> Self {
        Self { command }
    }
}

#[async_trait::async_trait]
impl Transcriber for CommandTranscriber {
    fn name(&self) -> &str {
        &self.command.program
    }

    async fn transcribe(&self, media: &Path) -> Result<Transcript> {
        let input = media.display().to_string();
        let stdout = run_command(&self.command.program, &self.command.render(&[("input", &input)])).await?;

        let transcript = match serde_json::from_str::<Transcript>(stdout.trim()) {
            Ok(parsed) => parsed,
            Err(_) => Transcript {
                text: stdout.trim().to_string(),
                confidence: None,
            },
        };

        if transcript.text.is_empty() {
            bail!("{} produced an empty transcript", self.command.program);
        }
        Ok(transcript)
    }
}

/// Video host backed by an upload tool that prints the new video id
pub struct CommandVideoHost {
    command: CommandSpec,
}

impl CommandVideoHost {
    pub fn new(command: CommandSpec) -> Self {
        Self { command }
    }
}

#[async_trait::async_trait]
impl VideoHost for CommandVideoHost {
    fn name(&self) -> &str {
        &self.command.program
    }

    async fn upload(&self, media: &Path, upload: &VideoUpload) -> Result<String> {
        let input = media.display().to_string();
        let args = self.command.render(&[
            ("input", &input),
            ("title", &upload.title),
            ("description", &upload.description),
            ("privacy", &upload.privacy),
        ]);
        let stdout = run_command(&self.command.program, &args).await?;

        // Upload tools tend to log progress; the id is the last line
        stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .last()
            .map(str::to_string)
            .with_context(|| format!("{} printed no video id", self.command.program))
    }
}
