//! Wire protocol of the camera server.
//!
//! Commands are ASCII lines terminated by `\n`:
//!
//! | Command          | Reply                                         |
//! |------------------|-----------------------------------------------|
//! | `etime`          | one line, last whitespace token is seconds    |
//! | `gain`           | one line, last whitespace token is the gain   |
//! | `etime <v>`      | one line echoing the accepted value           |
//! | `gain <v>`       | one line echoing the accepted value           |
//! | `image`          | `". <n>\n"` followed by exactly `n` bytes     |
//! | `shutter <state>`| optional acknowledgement line                 |
//!
//! [`DeviceConnection`] is generic over the stream so the codec can be
//! exercised against in-memory pipes.

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::debug;

use super::ShutterState;
use crate::error::{ErrorContext, OpsError, OpsResult};
use crate::models::ExposureSettings;

/// Upper bound on a single frame transfer (64 MiB).
pub const MAX_IMAGE_BYTES: usize = 64 * 1024 * 1024;

/// Longest reply line accepted before the peer is considered broken.
const MAX_LINE_BYTES: usize = 4096;

/// A single request to the camera server.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    QueryExposure,
    QueryGain,
    SetExposure(f64),
    SetGain(f64),
    Image,
    Shutter(ShutterState),
}

impl Command {
    /// Newline-terminated wire form.
    pub fn encode(&self) -> String {
        match self {
            Command::QueryExposure => "etime\n".to_string(),
            Command::QueryGain => "gain\n".to_string(),
            Command::SetExposure(secs) => format!("etime {}\n", format_value(*secs)),
            Command::SetGain(gain) => format!("gain {}\n", format_value(*gain)),
            Command::Image => "image\n".to_string(),
            Command::Shutter(state) => format!("shutter {}\n", state.wire_token()),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Command::QueryExposure | Command::SetExposure(_) => "etime",
            Command::QueryGain | Command::SetGain(_) => "gain",
            Command::Image => "image",
            Command::Shutter(_) => "shutter",
        }
    }
}

/// Whole numbers go out without a fractional part.
fn format_value(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{:.0}", v)
    } else {
        format!("{}", v)
    }
}

/// Extract the numeric value from a scalar reply line.
pub fn parse_scalar_reply(line: &str) -> Result<f64, String> {
    let token = line
        .split_whitespace()
        .last()
        .ok_or_else(|| "empty reply".to_string())?;
    let value: f64 = token
        .parse()
        .map_err(|_| format!("unparseable value {:?}", token))?;
    if !value.is_finite() {
        return Err(format!("non-finite value {:?}", token));
    }
    Ok(value)
}

/// Extract the byte count from an `image` reply header.
pub fn parse_image_header(line: &str) -> Result<usize, String> {
    let trimmed = line.trim();
    let count = trimmed
        .strip_prefix(". ")
        .ok_or_else(|| format!("unexpected header format: {:?}", trimmed))?;
    let size: usize = count
        .trim()
        .parse()
        .map_err(|_| format!("unparseable image size: {:?}", count.trim()))?;
    if size > MAX_IMAGE_BYTES {
        return Err(format!("image size {} exceeds limit {}", size, MAX_IMAGE_BYTES));
    }
    Ok(size)
}

fn context(endpoint: &str, operation: &str) -> ErrorContext {
    ErrorContext::new(operation).with_endpoint(endpoint)
}

/// One open connection to the camera server.
pub struct DeviceConnection<S> {
    stream: BufReader<S>,
    endpoint: String,
}

impl<S> DeviceConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, endpoint: impl Into<String>) -> Self {
        Self {
            stream: BufReader::new(stream),
            endpoint: endpoint.into(),
        }
    }

    /// Write one command.
    pub async fn send(&mut self, command: Command) -> OpsResult<()> {
        let wire = command.encode();
        debug!(endpoint = %self.endpoint, command = %wire.trim_end(), "Sending device command");
        self.stream
            .get_mut()
            .write_all(wire.as_bytes())
            .await
            .map_err(|e| {
                OpsError::transport(
                    format!("write failed: {}", e),
                    context(&self.endpoint, command.name()).retryable(),
                )
            })?;
        self.stream.get_mut().flush().await.map_err(|e| {
            OpsError::transport(
                format!("flush failed: {}", e),
                context(&self.endpoint, command.name()).retryable(),
            )
        })
    }

    /// Read one `\n`-terminated line. EOF before the newline is a transport error.
    pub async fn read_line(&mut self, operation: &str) -> OpsResult<String> {
        let mut buf = Vec::new();
        let read = (&mut self.stream)
            .take(MAX_LINE_BYTES as u64)
            .read_until(b'\n', &mut buf)
            .await
            .map_err(|e| {
                OpsError::transport(
                    format!("read failed: {}", e),
                    context(&self.endpoint, operation).retryable(),
                )
            })?;
        if read == 0 || buf.last() != Some(&b'\n') {
            let details = if buf.len() >= MAX_LINE_BYTES {
                "reply line too long"
            } else {
                "connection closed before reply line received"
            };
            return Err(OpsError::transport(
                details,
                context(&self.endpoint, operation).retryable(),
            ));
        }
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    /// Send a command whose reply is a single scalar.
    pub async fn query(&mut self, command: Command) -> OpsResult<f64> {
        self.send(command).await?;
        let line = self.read_line(command.name()).await?;
        parse_scalar_reply(&line).map_err(|msg| {
            OpsError::transport(msg, context(&self.endpoint, command.name()).with_details(line.trim()))
        })
    }

    /// Request a frame and read exactly the advertised number of bytes.
    pub async fn read_image(&mut self) -> OpsResult<Vec<u8>> {
        self.send(Command::Image).await?;
        let header = self.read_line("image").await?;
        let size = parse_image_header(&header)
            .map_err(|msg| OpsError::transport(msg, context(&self.endpoint, "image")))?;

        let mut bytes = vec![0u8; size];
        self.stream.read_exact(&mut bytes).await.map_err(|e| {
            OpsError::transport(
                format!("short image read: expected {} bytes ({})", size, e),
                context(&self.endpoint, "image").retryable(),
            )
        })?;
        debug!(endpoint = %self.endpoint, bytes = size, "Frame received");
        Ok(bytes)
    }

    /// Query exposure and gain, then transfer one frame.
    pub async fn fetch_frame(&mut self) -> OpsResult<(ExposureSettings, Vec<u8>)> {
        let exposure = self.query(Command::QueryExposure).await?;
        let gain = self.query(Command::QueryGain).await?;
        let bytes = self.read_image().await?;
        Ok((ExposureSettings::new(exposure, gain), bytes))
    }

    /// Set exposure then gain; returns the echoed values.
    pub async fn apply_settings(&mut self, settings: ExposureSettings) -> OpsResult<ExposureSettings> {
        let exposure = self.query(Command::SetExposure(settings.exposure_secs)).await?;
        let gain = self.query(Command::SetGain(settings.gain)).await?;
        Ok(ExposureSettings::new(exposure, gain))
    }

    /// Send a shutter command and wait briefly for an acknowledgement.
    ///
    /// Returns the reply line if one arrived within `reply_timeout`.
    pub async fn set_shutter(
        &mut self,
        state: ShutterState,
        reply_timeout: Duration,
    ) -> OpsResult<Option<String>> {
        self.send(Command::Shutter(state)).await?;
        match tokio::time::timeout(reply_timeout, self.read_line("shutter")).await {
            Ok(Ok(line)) => Ok(Some(line.trim().to_string())),
            Ok(Err(e)) => {
                debug!(endpoint = %self.endpoint, error = %e, "No shutter acknowledgement");
                Ok(None)
            }
            Err(_) => Ok(None),
        }
    }
}
