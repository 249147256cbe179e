//! Recorder that drives an external capture command (kiwirecorder flags).

use super::{Receiver, RecordingError, Session, SessionControl, SessionRequest};

use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};

/// Opens sessions by spawning one recorder process per session.
#[derive(Debug, Clone)]
pub struct CommandReceiver {
    program: PathBuf,
}

impl CommandReceiver {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Arguments for one session. No time limit: the process records until killed.
    pub fn args(request: &SessionRequest) -> Vec<String> {
        let params = &request.params;
        let mut args = vec![
            "-s".to_string(),
            request.instance.host.clone(),
            "-p".to_string(),
            request.instance.port.to_string(),
            "-f".to_string(),
            format!("{:.2}", params.frequency_khz()),
            "-m".to_string(),
            "usb".to_string(),
            "-L".to_string(),
            params.low_cut_hz.to_string(),
            "-H".to_string(),
            params.high_cut_hz.to_string(),
            "--dt-sec".to_string(),
            params.segment_secs.to_string(),
            "-d".to_string(),
            request.output_dir.display().to_string(),
        ];

        if !request.user.is_empty() {
            args.push("--user".to_string());
            args.push(request.user.clone());
        }
        if let Some(pw) = &request.instance.password {
            args.push("--pw".to_string());
            args.push(pw.clone());
        }
        if let Some(gain) = params.gain_db {
            args.push(format!("--agc-gain={}", gain));
        }
        if let Some(name) = &params.fixed_filename {
            args.push("--fn".to_string());
            args.push(name.clone());
        }

        args
    }
}

impl Receiver for CommandReceiver {
    fn open(&self, request: &SessionRequest) -> Result<Session, RecordingError> {
        let mut child = Command::new(&self.program)
            .args(Self::args(request))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        tracing::info!(
            "Recorder {}: started against {}:{} (pid {:?})",
            request.band,
            request.instance.host,
            request.instance.port,
            child.id()
        );

        let (session, control) = Session::pair();
        let band = request.band.clone();
        let stderr = child.stderr.take();

        let drain = tokio::spawn(async move {
            let mut last = String::new();
            if let Some(stderr) = stderr {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!("Recorder {}: {}", band, line);
                    last = line;
                }
            }
            last
        });

        tokio::spawn(supervise(child, control, drain, request.band.clone()));

        Ok(session)
    }
}

/// Wait for either the session to be dropped (kill the process) or the
/// process to exit on its own (report the failure).
async fn supervise(
    mut child: Child,
    mut control: SessionControl,
    drain: tokio::task::JoinHandle<String>,
    band: String,
) {
    tokio::select! {
        _ = &mut control.shutdown => {
            if let Err(e) = child.kill().await {
                tracing::warn!("Recorder {}: failed to kill process: {}", band, e);
            }
            drain.abort();
        }
        status = child.wait() => {
            let last = drain.await.unwrap_or_default();
            let reason = match status {
                Ok(status) if last.is_empty() => format!("recorder exited with {}", status),
                Ok(status) => format!("recorder exited with {}: {}", status, last),
                Err(e) => format!("failed to wait for recorder: {}", e),
            };
            control.fail(reason);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Instance;
    use crate::receiver::RecordingParams;
    use std::time::Duration;

    fn request() -> SessionRequest {
        SessionRequest {
            band: "20m".to_string(),
            instance: Instance {
                name: "kiwi1".to_string(),
                host: "10.0.0.5".to_string(),
                port: 8073,
                password: Some("s3cret".to_string()),
                display_name: None,
            },
            params: RecordingParams::wspr(14_095_600, 120),
            output_dir: PathBuf::from("/tmp/wspr/20m"),
            user: "N0CALL".to_string(),
        }
    }

    #[test]
    fn test_args() {
        let args = CommandReceiver::args(&request());
        let joined = args.join(" ");
        assert!(joined.starts_with("-s 10.0.0.5 -p 8073 -f 14095.60 -m usb -L 1300 -H 1700"));
        assert!(joined.contains("--dt-sec 120"));
        assert!(joined.contains("-d /tmp/wspr/20m"));
        assert!(joined.contains("--user N0CALL"));
        assert!(joined.contains("--pw s3cret"));
        assert!(!joined.contains("--fn"));
        assert!(!joined.contains("--agc-gain"));
    }

    #[test]
    fn test_args_fixed_filename_and_gain() {
        let mut req = request();
        req.params.fixed_filename = Some("20m.wav".to_string());
        req.params.gain_db = Some(50.0);
        req.instance.password = None;
        let joined = CommandReceiver::args(&req).join(" ");
        assert!(joined.contains("--fn 20m.wav"));
        assert!(joined.contains("--agc-gain=50"));
        assert!(!joined.contains("--pw"));
    }

    #[tokio::test]
    async fn test_exit_is_reported_as_failure() {
        // `false` ignores its arguments and exits 1 straight away.
        let receiver = CommandReceiver::new("false");
        let mut session = receiver.open(&request()).unwrap();
        let failure = session.take_failure().unwrap();

        let reason = tokio::time::timeout(Duration::from_secs(5), failure)
            .await
            .unwrap()
            .unwrap();
        assert!(reason.contains("recorder exited"));
    }

    #[tokio::test]
    async fn test_missing_program() {
        let receiver = CommandReceiver::new("/nonexistent/kiwirecorder.py");
        assert!(matches!(
            receiver.open(&request()),
            Err(RecordingError::Spawn(_))
        ));
    }
}
