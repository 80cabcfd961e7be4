//! External batch downloader (aria2c)
//!
//! Only used when the caller opts out of the internal worker pool. The tool
//! gets the whole segment list at once, so progress is only known at the end.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

use crate::core::client::ClientConfig;
use crate::core::error_handling::{HlsError, HlsResult};
use crate::core::models::SegmentFile;
use crate::core::segment_fetcher::{existing_segment_path, segment_file_name};
use crate::utils::system::is_tool_available;

const INPUT_FILE_NAME: &str = "aria2c-input.txt";
const SESSION_FILE_NAME: &str = "aria2c-session.txt";

#[derive(Debug, Clone)]
pub struct ExternalDownloader {
    aria2c_path: PathBuf,
    max_tries: u32,
    client: ClientConfig,
}

impl ExternalDownloader {
    pub fn new(aria2c_path: impl Into<PathBuf>, max_tries: u32, client: ClientConfig) -> Self {
        Self {
            aria2c_path: aria2c_path.into(),
            max_tries: max_tries.max(1),
            client,
        }
    }

    /// Returns a downloader only when the caller allows it and the tool runs.
    pub async fn detect(
        prefer_internal_downloader: bool,
        aria2c_path: impl Into<PathBuf>,
        max_tries: u32,
        client: &ClientConfig,
    ) -> Option<Self> {
        if prefer_internal_downloader {
            return None;
        }
        let aria2c_path = aria2c_path.into();
        if !is_tool_available(&aria2c_path, &["--version"]).await {
            tracing::debug!("{} not available, using internal downloader", aria2c_path.display());
            return None;
        }
        Some(Self::new(aria2c_path, max_tries, client.clone()))
    }

    /// aria2c input file: one URL per entry with its target file name
    pub fn input_file_contents(segments: &[String]) -> String {
        segments
            .iter()
            .enumerate()
            .map(|(index, url)| format!("{}\n  out={}\n", url, segment_file_name(index)))
            .collect()
    }

    fn command_args(
        &self,
        input_file: &Path,
        session_file: &Path,
        dir: &Path,
        max_workers: usize,
    ) -> HlsResult<Vec<String>> {
        let mut args = vec![
            format!("--input-file={}", input_file.display()),
            format!("--save-session={}", session_file.display()),
            format!("--dir={}", dir.display()),
            format!("--max-concurrent-downloads={}", max_workers),
            format!("--max-tries={}", self.max_tries),
            "--retry-wait=1".to_string(),
            "--max-connection-per-server=1".to_string(),
            "--allow-overwrite=true".to_string(),
            "--auto-file-renaming=false".to_string(),
            "--console-log-level=warn".to_string(),
            "--summary-interval=0".to_string(),
            format!("--user-agent={}", self.client.user_agent),
        ];
        // same header set the internal client sends
        for (name, value) in self.client.header_map()?.iter() {
            let value = value
                .to_str()
                .map_err(|e| HlsError::Config(format!("invalid value for {}: {}", name, e)))?;
            args.push(format!("--header={}: {}", name, value));
        }
        if let Some(proxy) = &self.client.proxy {
            args.push(format!("--all-proxy={}", proxy));
        }
        Ok(args)
    }

    /// Download every segment into `dir`; any unverified output fails the batch.
    ///
    /// A segment counts as done only if its file exists without an aria2
    /// control file. After a non-zero exit it must also be absent from the
    /// saved session, and an unreadable session fails every segment.
    pub async fn fetch_all(
        &self,
        segments: &[String],
        dir: &Path,
        max_workers: usize,
    ) -> HlsResult<Vec<SegmentFile>> {
        let input_file = dir.join(INPUT_FILE_NAME);
        let session_file = dir.join(SESSION_FILE_NAME);
        tokio::fs::write(&input_file, Self::input_file_contents(segments)).await?;
        let _ = tokio::fs::remove_file(&session_file).await;

        tracing::info!(
            "Delegating {} segments to {}",
            segments.len(),
            self.aria2c_path.display()
        );

        let status = Command::new(&self.aria2c_path)
            .args(self.command_args(&input_file, &session_file, dir, max_workers)?)
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .status()
            .await
            .map_err(|e| {
                HlsError::ExternalTool(format!(
                    "failed to launch {}: {}",
                    self.aria2c_path.display(),
                    e
                ))
            })?;

        let unfinished: HashSet<usize> = if status.success() {
            HashSet::new()
        } else {
            tracing::warn!("{} exited with {}", self.aria2c_path.display(), status);
            match tokio::fs::read_to_string(&session_file).await {
                Ok(session) => unfinished_indices(&session),
                Err(e) => {
                    tracing::warn!("No usable aria2c session ({}), discarding all segments", e);
                    (0..segments.len()).collect()
                }
            }
        };

        let mut files = Vec::with_capacity(segments.len());
        let mut failed = Vec::new();
        for index in 0..segments.len() {
            let control_file = dir.join(format!("{}.aria2", segment_file_name(index)));
            let local_path = match existing_segment_path(dir, index) {
                Some(path) if !unfinished.contains(&index) && !control_file.exists() => path,
                _ => {
                    failed.push(index);
                    continue;
                }
            };
            let bytes = tokio::fs::metadata(&local_path).await?.len();
            files.push(SegmentFile {
                index,
                local_path,
                bytes,
            });
        }

        if !failed.is_empty() {
            return Err(HlsError::JobAggregateFailure {
                failed,
                total: segments.len(),
            });
        }
        Ok(files)
    }
}

/// Segment indices named by `out=` lines of an aria2c session file
fn unfinished_indices(session: &str) -> HashSet<usize> {
    session
        .lines()
        .filter_map(|line| line.trim().strip_prefix("out="))
        .filter_map(|name| name.strip_prefix("segment_")?.strip_suffix(".ts")?.parse().ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn segments(count: usize) -> Vec<String> {
        (0..count)
            .map(|i| format!("http://cdn.example/{}.ts", i))
            .collect()
    }

    #[test]
    fn test_input_file_contents() {
        let segments = vec![
            "http://cdn.example/a.ts".to_string(),
            "http://cdn.example/b.ts".to_string(),
        ];
        assert_eq!(
            ExternalDownloader::input_file_contents(&segments),
            "http://cdn.example/a.ts\n  out=segment_000000.ts\nhttp://cdn.example/b.ts\n  out=segment_000001.ts\n"
        );
    }

    #[test]
    fn test_command_args_carry_client_settings() {
        let mut client = ClientConfig::default();
        client.proxy = Some("http://proxy.local:3128".to_string());
        client
            .headers
            .insert("Referer".to_string(), "https://site.example/".to_string());

        let downloader = ExternalDownloader::new("aria2c", 5, client);
        let args = downloader
            .command_args(
                Path::new("/tmp/in.txt"),
                Path::new("/tmp/session.txt"),
                Path::new("/tmp/job"),
                8,
            )
            .unwrap();

        assert!(args.contains(&"--max-concurrent-downloads=8".to_string()));
        assert!(args.contains(&"--max-tries=5".to_string()));
        assert!(args.contains(&"--save-session=/tmp/session.txt".to_string()));
        assert!(args.contains(&"--all-proxy=http://proxy.local:3128".to_string()));
        // configured value wins over the default Referer
        assert!(args.contains(&"--header=referer: https://site.example/".to_string()));
        assert!(!args.contains(&"--header=referer: https://www.google.com/".to_string()));
        // defaults the internal client sends are passed too
        assert!(args.contains(&"--header=accept-language: en-US,en;q=0.9".to_string()));
    }

    #[test]
    fn test_unfinished_indices_from_session() {
        let session = "http://cdn.example/1.ts\n  out=segment_000001.ts\n  dir=/tmp/job\nhttp://cdn.example/4.ts\n out=segment_000004.ts\n";
        let unfinished = unfinished_indices(session);
        assert_eq!(unfinished, HashSet::from([1, 4]));
        assert!(unfinished_indices("").is_empty());
    }

    #[tokio::test]
    async fn test_preferring_internal_skips_detection() {
        let found = ExternalDownloader::detect(true, "aria2c", 5, &ClientConfig::default()).await;
        assert!(found.is_none());
    }

    /// Fake aria2c: `body` runs with `$d` set to --dir and `$s` to --save-session
    #[cfg(unix)]
    fn fake_tool(dir: &Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let tool = dir.join("fake-aria2c");
        let script = format!(
            "#!/bin/sh\nfor a in \"$@\"; do case \"$a\" in --dir=*) d=\"${{a#--dir=}}\";; --save-session=*) s=\"${{a#--save-session=}}\";; esac; done\n{}",
            body
        );
        std::fs::write(&tool, script).unwrap();
        std::fs::set_permissions(&tool, std::fs::Permissions::from_mode(0o755)).unwrap();
        tool
    }

    #[cfg(unix)]
    fn job_dir(root: &Path) -> PathBuf {
        let dir = root.join("job");
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_missing_outputs_fail_the_batch() {
        let root = tempdir().unwrap();
        // writes only the first segment
        let tool = fake_tool(root.path(), "printf x > \"$d/segment_000000.ts\"\n");

        let downloader = ExternalDownloader::new(&tool, 1, ClientConfig::default());
        let err = downloader
            .fetch_all(&segments(3), &job_dir(root.path()), 2)
            .await
            .unwrap_err();

        assert_eq!(err.failed_indices(), &[1, 2]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_partial_segment_with_control_file_fails() {
        let root = tempdir().unwrap();
        let tool = fake_tool(
            root.path(),
            "printf full > \"$d/segment_000000.ts\"\nprintf pa > \"$d/segment_000001.ts\"\n: > \"$d/segment_000001.ts.aria2\"\nprintf 'http://cdn.example/1.ts\\n  out=segment_000001.ts\\n' > \"$s\"\nexit 1\n",
        );

        let downloader = ExternalDownloader::new(&tool, 1, ClientConfig::default());
        let err = downloader
            .fetch_all(&segments(2), &job_dir(root.path()), 2)
            .await
            .unwrap_err();

        assert_eq!(err.failed_indices(), &[1]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_control_file_fails_segment_even_on_clean_exit() {
        let root = tempdir().unwrap();
        let tool = fake_tool(
            root.path(),
            "printf a > \"$d/segment_000000.ts\"\nprintf b > \"$d/segment_000001.ts\"\n: > \"$d/segment_000000.ts.aria2\"\n",
        );

        let downloader = ExternalDownloader::new(&tool, 1, ClientConfig::default());
        let err = downloader
            .fetch_all(&segments(2), &job_dir(root.path()), 2)
            .await
            .unwrap_err();

        assert_eq!(err.failed_indices(), &[0]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_exit_without_session_trusts_nothing() {
        let root = tempdir().unwrap();
        let tool = fake_tool(
            root.path(),
            "printf a > \"$d/segment_000000.ts\"\nprintf b > \"$d/segment_000001.ts\"\nexit 7\n",
        );

        let downloader = ExternalDownloader::new(&tool, 1, ClientConfig::default());
        let err = downloader
            .fetch_all(&segments(2), &job_dir(root.path()), 2)
            .await
            .unwrap_err();

        assert_eq!(err.failed_indices(), &[0, 1]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_clean_run_returns_every_segment() {
        let root = tempdir().unwrap();
        let tool = fake_tool(
            root.path(),
            "printf aa > \"$d/segment_000000.ts\"\nprintf bbb > \"$d/segment_000001.ts\"\n",
        );

        let downloader = ExternalDownloader::new(&tool, 1, ClientConfig::default());
        let files = downloader
            .fetch_all(&segments(2), &job_dir(root.path()), 2)
            .await
            .unwrap();

        assert_eq!(files.iter().map(|f| f.bytes).collect::<Vec<_>>(), vec![2, 3]);
    }
}
