use anyhow::{anyhow, Result};
use chromiumoxide::async_process::Child;
use futures::io::{AsyncBufReadExt, BufReader};
use futures::stream::StreamExt;
use tokio::time::{timeout, Duration};

const WS_URL_TIMEOUT: Duration = Duration::from_secs(20);

/// Pull the DevTools websocket URL out of one stderr line, if present.
fn devtools_url_in(line: &str) -> Option<String> {
    let (_, tail) = line.rsplit_once("listening on ")?;
    let ws = tail.trim();
    (ws.starts_with("ws") && ws.contains("devtools/browser")).then(|| ws.to_string())
}

/// Read a freshly launched Chromium's stderr until it announces its
/// DevTools websocket URL.
pub async fn extract_ws_url(child: &mut Child) -> Result<String> {
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("chromium process missing stderr handle"))?;
    let mut lines = BufReader::new(stderr).lines();
    let mut seen = Vec::new();

    let reader = async {
        while let Some(line) = lines.next().await {
            let line = line?;
            if let Some(ws) = devtools_url_in(&line) {
                return Ok(ws);
            }
            if seen.len() < 8 {
                seen.push(line);
            }
        }
        Err(anyhow!(
            "chromium exited before announcing a devtools url; stderr began: {}",
            seen.join(" | ")
        ))
    };

    timeout(WS_URL_TIMEOUT, reader)
        .await
        .map_err(|_| anyhow!("timed out waiting for chromium devtools websocket url"))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_the_devtools_banner() {
        let line = "DevTools listening on ws://127.0.0.1:9222/devtools/browser/abc-123";
        assert_eq!(
            devtools_url_in(line).as_deref(),
            Some("ws://127.0.0.1:9222/devtools/browser/abc-123")
        );
    }

    #[test]
    fn ignores_unrelated_stderr_noise() {
        assert!(devtools_url_in("[WARNING] gpu init failed").is_none());
        assert!(devtools_url_in("listening on http://localhost:8080").is_none());
        assert!(devtools_url_in("").is_none());
    }
}
