//! `psql`-subprocess implementation of the SQL runner.
//!
//! Scripts are fed on stdin with `ON_ERROR_STOP` so the first failing
//! statement aborts the client with a non-zero exit; queries use unaligned
//! tuple-only output so rows parse as tab-separated fields.

use crate::dest::Dest;
use crate::error::{DbError, DbResult};
use crate::traits::{ExitResult, OnLine, SqlRunner};
use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;

const FIELD_SEP: char = '\t';

/// Runs scripts and queries through the `psql` client binary.
#[derive(Debug, Clone)]
pub struct PsqlRunner {
    program: String,
}

impl Default for PsqlRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl PsqlRunner {
    pub fn new() -> Self {
        Self {
            program: "psql".to_string(),
        }
    }

    /// Use a non-default client binary (e.g. a versioned `psql-16`).
    pub fn with_program(program: &str) -> Self {
        Self {
            program: program.to_string(),
        }
    }

    /// Check that the client binary is available on PATH.
    pub fn check_available(&self) -> DbResult<()> {
        match std::process::Command::new(&self.program)
            .arg("--version")
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()
        {
            Ok(status) if status.success() => Ok(()),
            Ok(_) => Err(DbError::Spawn {
                program: self.program.clone(),
                source: std::io::Error::other("--version probe exited non-zero"),
            }),
            Err(e) => Err(DbError::Spawn {
                program: self.program.clone(),
                source: e,
            }),
        }
    }

    fn command(&self, dest: &Dest) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("-X")
            .arg("-v")
            .arg("ON_ERROR_STOP=1")
            .arg("-h")
            .arg(&dest.host)
            .arg("-p")
            .arg(dest.port.to_string())
            .arg("-U")
            .arg(&dest.user)
            .arg("-d")
            .arg(&dest.db)
            .env("PGPASSWORD", &dest.password)
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl SqlRunner for PsqlRunner {
    async fn run_script(
        &self,
        dest: &Dest,
        script: &str,
        on_line: OnLine<'_>,
    ) -> DbResult<ExitResult> {
        let mut child = self
            .command(dest)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| DbError::Spawn {
                program: self.program.clone(),
                source: e,
            })?;

        let mut stdin = child.stdin.take().expect("stdin was piped");
        let stdout = child.stdout.take().expect("stdout was piped");
        let mut stderr = child.stderr.take().expect("stderr was piped");

        let script_bytes = script.as_bytes().to_vec();
        let feed = async move {
            // A closed pipe just means the client died early; the exit
            // status reports the real failure.
            let _ = stdin.write_all(&script_bytes).await;
            drop(stdin);
        };

        let read_stdout = async {
            let mut collected = String::new();
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if !line.trim().is_empty() {
                    on_line(line.trim_end());
                }
                collected.push_str(&line);
                collected.push('\n');
            }
            collected
        };

        let read_stderr = async {
            let mut collected = String::new();
            let _ = stderr.read_to_string(&mut collected).await;
            collected
        };

        let (_, stdout_text, stderr_text) = tokio::join!(feed, read_stdout, read_stderr);
        let status = child.wait().await?;

        Ok(ExitResult {
            code: status.code().unwrap_or(-1),
            warning: stderr_text.contains("WARNING:"),
            stdout: stdout_text,
            stderr: stderr_text,
        })
    }

    async fn run_query(&self, dest: &Dest, sql: &str) -> DbResult<Vec<Vec<String>>> {
        let output = self
            .command(dest)
            .arg("-A")
            .arg("-t")
            .arg("-F")
            .arg(FIELD_SEP.to_string())
            .arg("-c")
            .arg(sql)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| DbError::Spawn {
                program: self.program.clone(),
                source: e,
            })?;

        if !output.status.success() {
            return Err(DbError::QueryFailed {
                target: dest.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout
            .lines()
            .filter(|line| !line.is_empty())
            .map(|line| line.split(FIELD_SEP).map(str::to_string).collect())
            .collect())
    }
}
