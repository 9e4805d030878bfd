//! OpenSSH-backed transport.
//!
//! Each host gets one multiplexed OpenSSH master. Commands, elevated commands
//! and file transfers are all channels on that master, so concurrent uploads
//! to the same host share a single authenticated connection.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures::future::join;
use futures::stream::{self, StreamExt};
use openssh::{KnownHosts, Session as SSHSession, SessionBuilder, Stdio};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};

use crate::config::Credentials;
use crate::error::RolloutError;
use crate::step::FilePair;
use crate::transport::{
    CommandOutcome, Connection, ElevatedRequest, ExecRequest, OutputSink, OutputStream, Transport,
};

/// Creates the parent directory of `$1` and writes stdin into it.
const UPLOAD_SCRIPT: &str = r#"mkdir -p -- "$(dirname -- "$1")" && cat > "$1""#;

/// Connects with the system `ssh` client. Authentication is whatever OpenSSH
/// is configured to do (keys, agent); the password is only used for `sudo`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SshTransport;

#[async_trait]
impl Transport for SshTransport {
    async fn connect(
        &self,
        host: &str,
        credentials: &Credentials,
    ) -> Result<Box<dyn Connection>, RolloutError> {
        let mut builder = SessionBuilder::default();
        builder
            .user(credentials.username.clone())
            .known_hosts_check(KnownHosts::Add);
        let session = builder
            .connect_mux(host)
            .await
            .map_err(|source| RolloutError::Connection {
                host: host.to_string(),
                source,
            })?;
        Ok(Box::new(SshConnection {
            host: host.to_string(),
            session,
        }))
    }
}

pub struct SshConnection {
    host: String,
    session: SSHSession,
}

#[async_trait]
impl Connection for SshConnection {
    async fn execute(
        &self,
        request: &ExecRequest,
        sink: &dyn OutputSink,
    ) -> Result<CommandOutcome, RolloutError> {
        let mut cmd = self.session.command("sh");
        cmd.args(exec_args(request))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let mut child = cmd.spawn().await?;
        let (stdout, stderr) = join(
            read_lines(child.stdout().take(), OutputStream::Stdout, sink),
            read_lines(child.stderr().take(), OutputStream::Stderr, sink),
        )
        .await;
        let status = child.wait().await?;
        Ok(CommandOutcome {
            exit_code: status.code(),
            stdout: stdout?,
            stderr: stderr?,
        })
    }

    async fn execute_elevated(
        &self,
        request: &ElevatedRequest,
        sink: &dyn OutputSink,
    ) -> Result<CommandOutcome, RolloutError> {
        let mut cmd = self.session.command("sh");
        cmd.args(elevated_args(request))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let mut child = cmd.spawn().await?;
        if let Some(mut stdin) = child.stdin().take() {
            stdin.write_all(request.stdin.as_bytes()).await?;
            stdin.shutdown().await?;
        }
        let (stdout, stderr) = join(
            read_lines(child.stdout().take(), OutputStream::Stdout, sink),
            read_lines(child.stderr().take(), OutputStream::Stderr, sink),
        )
        .await;
        let status = child.wait().await?;
        Ok(CommandOutcome {
            exit_code: status.code(),
            stdout: stdout?,
            stderr: stderr?,
        })
    }

    async fn upload_files(
        &self,
        files: &[FilePair],
        concurrency: usize,
    ) -> Result<bool, RolloutError> {
        let uploads: Vec<_> = files.iter().map(|pair| self.upload_file(pair)).collect();
        let results: Vec<Result<bool, RolloutError>> = stream::iter(uploads)
            .buffer_unordered(concurrency.max(1))
            .collect()
            .await;
        let mut success = true;
        for result in results {
            success &= result?;
        }
        Ok(success)
    }

    async fn close(self: Box<Self>) -> Result<(), RolloutError> {
        self.session.close().await?;
        Ok(())
    }

    async fn upload_directory(
        &self,
        local: &str,
        remote: &str,
        concurrency: usize,
    ) -> Result<bool, RolloutError> {
        let files = collect_files(Path::new(local), remote)
            .await
            .map_err(|e| self.upload_error(local, e))?;
        let status = self
            .session
            .command("mkdir")
            .arg("-p")
            .arg("--")
            .arg(remote)
            .status()
            .await?;
        if !status.success() {
            return Ok(false);
        }
        self.upload_files(&files, concurrency).await
    }
}

impl SshConnection {
    async fn upload_file(&self, pair: &FilePair) -> Result<bool, RolloutError> {
        let mut local = tokio::fs::File::open(&pair.local)
            .await
            .map_err(|e| self.upload_error(&pair.local, e))?;
        let mut cmd = self.session.command("sh");
        cmd.arg("-c")
            .arg(UPLOAD_SCRIPT)
            .arg("rollout-upload")
            .arg(&pair.remote)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        let mut child = cmd.spawn().await?;
        if let Some(mut stdin) = child.stdin().take() {
            tokio::io::copy(&mut local, &mut stdin)
                .await
                .map_err(|e| self.upload_error(&pair.local, e))?;
            stdin.shutdown().await?;
        }
        let status = child.wait().await?;
        Ok(status.success())
    }

    fn upload_error(&self, path: &str, error: std::io::Error) -> RolloutError {
        RolloutError::Upload {
            host: self.host.clone(),
            path: path.to_string(),
            message: error.to_string(),
        }
    }
}

/// Changes into `$1` when it is non-empty, then runs the remaining arguments
/// as a program. Every value travels as its own escaped argument, so paths
/// and tokens are never re-parsed by the outer shell.
const IN_DIR_SCRIPT: &str = r#"if [ -n "$1" ]; then cd -- "$1" || exit 1; fi; shift; exec "$@""#;

/// Arguments for `sh`: run `program` inside `cwd`.
fn in_dir(cwd: Option<&str>, program: Vec<String>) -> Vec<String> {
    let mut args = vec![
        "-c".to_string(),
        IN_DIR_SCRIPT.to_string(),
        "rollout".to_string(),
        cwd.unwrap_or_default().to_string(),
    ];
    args.extend(program);
    args
}

/// `env KEY=VALUE... sh -c <command>`: the command itself is shell syntax.
fn exec_args(request: &ExecRequest) -> Vec<String> {
    let mut program = vec!["env".to_string()];
    program.extend(request.env.iter().cloned());
    program.extend(["sh".to_string(), "-c".to_string(), request.command.clone()]);
    in_dir(request.cwd.as_deref(), program)
}

/// Multiplexed channels cannot request a pty, so `sudo` is told to read the
/// password from stdin (`-S`) without printing a prompt. `env` entries go on
/// sudo's command line since `env_reset` drops the caller's environment;
/// sudoers may still refuse variables it is not configured to keep.
fn elevated_args(request: &ElevatedRequest) -> Vec<String> {
    let mut program = vec![request.program.clone()];
    if request.program == "sudo" {
        program.extend(["-S".to_string(), "-p".to_string(), String::new()]);
    }
    program.extend(request.env.iter().cloned());
    program.extend(request.args.iter().cloned());
    in_dir(request.cwd.as_deref(), program)
}

/// Regular files under `local`, paired with their path under `remote`.
async fn collect_files(local: &Path, remote: &str) -> std::io::Result<Vec<FilePair>> {
    let mut files = Vec::new();
    let mut pending: Vec<(PathBuf, String)> =
        vec![(local.to_path_buf(), remote.trim_end_matches('/').to_string())];
    while let Some((dir, remote_dir)) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let file_type = entry.file_type().await?;
            let remote_path = format!("{}/{}", remote_dir, entry.file_name().to_string_lossy());
            if file_type.is_dir() {
                pending.push((entry.path(), remote_path));
            } else if file_type.is_file() {
                files.push(FilePair::new(
                    entry.path().to_string_lossy(),
                    remote_path,
                ));
            }
        }
    }
    files.sort_by(|a, b| a.local.cmp(&b.local));
    Ok(files)
}

/// Reads `stream` to the end, handing every non-empty line to `sink`.
async fn read_lines<B: AsyncRead + Unpin>(
    stream: Option<B>,
    which: OutputStream,
    sink: &dyn OutputSink,
) -> std::io::Result<Vec<String>> {
    let mut lines = Vec::new();
    let stream = match stream {
        Some(stream) => stream,
        None => return Ok(lines),
    };
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::with_capacity(reader.buffer().len());
    loop {
        buf.clear();
        read_until2(&mut reader, b'\r', b'\n', &mut buf).await?;
        // An empty buffer means that EOF was reached.
        if buf.is_empty() {
            break;
        }
        if matches!(buf.last(), Some(b'\r') | Some(b'\n')) {
            buf.pop();
        }
        // "\r\n" shows up as an empty line after the '\r'.
        if buf.is_empty() {
            continue;
        }
        let line = String::from_utf8_lossy(&buf).into_owned();
        sink.line(which, &line);
        lines.push(line);
    }
    Ok(lines)
}

/// Reads into `buf` until either delimiter (inclusive) or EOF.
async fn read_until2<B: AsyncRead + Unpin>(
    reader: &mut BufReader<B>,
    delimiter1: u8,
    delimiter2: u8,
    buf: &mut Vec<u8>,
) -> std::io::Result<()> {
    loop {
        let (done, used) = {
            let available = reader.fill_buf().await?;
            if let Some(i) = memchr::memchr2(delimiter1, delimiter2, available) {
                buf.extend_from_slice(&available[..=i]);
                (true, i + 1)
            } else {
                buf.extend_from_slice(available);
                (false, available.len())
            }
        };
        reader.consume(used);
        if done || used == 0 {
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct Collect(Mutex<Vec<(OutputStream, String)>>);

    impl OutputSink for Collect {
        fn line(&self, stream: OutputStream, line: &str) {
            self.0.lock().unwrap().push((stream, line.to_string()));
        }
    }

    fn strings(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    #[test]
    fn test_exec_args_plain() {
        let request = ExecRequest {
            command: "ls -al | wc -l".to_string(),
            cwd: None,
            env: vec![],
        };
        assert_eq!(
            exec_args(&request),
            strings(&["-c", IN_DIR_SCRIPT, "rollout", "", "env", "sh", "-c", "ls -al | wc -l"])
        );
    }

    #[test]
    fn test_exec_args_env_and_cwd_with_space() {
        let request = ExecRequest {
            command: "make".to_string(),
            cwd: Some("/srv/my app".to_string()),
            env: strings(&["A=1", "B=two words"]),
        };
        assert_eq!(
            exec_args(&request),
            strings(&[
                "-c",
                IN_DIR_SCRIPT,
                "rollout",
                "/srv/my app",
                "env",
                "A=1",
                "B=two words",
                "sh",
                "-c",
                "make",
            ])
        );
    }

    #[test]
    fn test_elevated_args_keep_tokens_separate() {
        let request = ElevatedRequest {
            program: "sudo".to_string(),
            args: "echo hi > /etc/motd"
                .split_whitespace()
                .map(str::to_string)
                .collect(),
            cwd: Some("/srv/my app".to_string()),
            env: strings(&["MODE=prod"]),
            stdin: "secret\n".to_string(),
            pty: true,
        };
        assert_eq!(
            elevated_args(&request),
            strings(&[
                "-c",
                IN_DIR_SCRIPT,
                "rollout",
                "/srv/my app",
                "sudo",
                "-S",
                "-p",
                "",
                "MODE=prod",
                "echo",
                "hi",
                ">",
                "/etc/motd",
            ])
        );
        assert!(!format!("{:?}", request).contains("secret"));
    }

    #[tokio::test]
    async fn test_read_lines_splits_on_cr_and_lf() {
        let sink = Collect::default();
        let input: &[u8] = b"one\r\ntwo\nthree\rfour";
        let lines = read_lines(Some(input), OutputStream::Stderr, &sink)
            .await
            .unwrap();
        assert_eq!(lines, vec!["one", "two", "three", "four"]);
        let seen = sink.0.lock().unwrap();
        assert_eq!(seen.len(), 4);
        assert!(seen.iter().all(|(s, _)| *s == OutputStream::Stderr));
    }

    #[tokio::test]
    async fn test_read_lines_replaces_invalid_utf8() {
        let sink = Collect::default();
        let input: &[u8] = b"ok \xff\n";
        let lines = read_lines(Some(input), OutputStream::Stdout, &sink)
            .await
            .unwrap();
        assert_eq!(lines, vec!["ok \u{FFFD}"]);
    }

    #[tokio::test]
    async fn test_read_lines_missing_stream() {
        let sink = Collect::default();
        let lines = read_lines(None::<&[u8]>, OutputStream::Stdout, &sink)
            .await
            .unwrap();
        assert!(lines.is_empty());
    }

    #[tokio::test]
    async fn test_collect_files_walks_tree() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("css/vendor")).unwrap();
        std::fs::write(dir.path().join("index.html"), "<html>").unwrap();
        std::fs::write(dir.path().join("css/site.css"), "body{}").unwrap();
        std::fs::write(dir.path().join("css/vendor/x.css"), "").unwrap();

        let files = collect_files(dir.path(), "/srv/static/").await.unwrap();
        let mut remotes: Vec<_> = files.iter().map(|f| f.remote.as_str()).collect();
        remotes.sort();
        assert_eq!(
            remotes,
            vec![
                "/srv/static/css/site.css",
                "/srv/static/css/vendor/x.css",
                "/srv/static/index.html",
            ]
        );
        assert!(files
            .iter()
            .all(|f| f.local.starts_with(&*dir.path().to_string_lossy())));
    }
}
