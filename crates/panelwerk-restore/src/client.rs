// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Restoration client — the boundary to the hosted restoration model.
//
// One `submit` is one network call. Inputs are checked before anything is
// sent: an empty image, an image above the pixel-area limit, or a mask whose
// size differs from the image is a fatal outcome and never reaches the wire.
//
// Outcome classification:
//   - HTTP 408, 429, 5xx, timeouts, connection failures → TransientFailure
//   - any other non-2xx (400, 401, 403, 413, 422, ...) → FatalFailure
//   - 2xx bodies carry their own `status`: success | transient_error | fatal_error

use std::future::Future;
use std::io::Cursor;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use image::{ImageBuffer, ImageFormat, Pixel, PixelWithColorType};
use image::{GrayImage, RgbImage};
use panelwerk_core::config::ServiceConfig;
use panelwerk_core::error::{PanelwerkError, Result};
use panelwerk_core::types::{ErrorClass, RestorationParams};
use panelwerk_document::raster::processor::flatten_to_rgb;
use reqwest::Client;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

/// Longest slice of an error body kept in a failure reason.
const MAX_REASON_BODY: usize = 200;

/// One submission to the restoration service.
#[derive(Debug, Clone, Copy)]
pub struct RestorationRequest<'a> {
    pub image: &'a RgbImage,
    /// White marks damage eligible for inpainting. `None` restores the whole page.
    pub mask: Option<&'a GrayImage>,
    pub params: &'a RestorationParams,
}

/// Tagged result of one submission.
#[derive(Debug, Clone)]
pub enum RestorationOutcome {
    Success {
        buffer: RgbImage,
    },
    /// Worth retrying after a backoff. `retry_after_ms` is the service's own
    /// hint, when it sent one.
    TransientFailure {
        reason: String,
        retry_after_ms: Option<u64>,
    },
    FatalFailure {
        reason: String,
    },
}

impl RestorationOutcome {
    pub fn transient(reason: impl Into<String>) -> Self {
        Self::TransientFailure {
            reason: reason.into(),
            retry_after_ms: None,
        }
    }

    pub fn fatal(reason: impl Into<String>) -> Self {
        Self::FatalFailure {
            reason: reason.into(),
        }
    }

    /// The restored buffer, or the failure as a service error.
    pub fn into_result(self) -> Result<RgbImage> {
        match self {
            Self::Success { buffer } => Ok(buffer),
            Self::TransientFailure {
                reason,
                retry_after_ms,
            } => Err(PanelwerkError::ServiceTransient {
                reason,
                retry_after_ms,
            }),
            Self::FatalFailure { reason } => Err(PanelwerkError::ServiceFatal(reason)),
        }
    }
}

/// Anything that can run a restoration. Implemented by the hosted client and
/// by scripted clients in tests.
pub trait RestorationClient {
    fn submit(
        &self,
        request: &RestorationRequest<'_>,
    ) -> impl Future<Output = RestorationOutcome> + Send;
}

/// Reject inputs the service must never see.
pub fn preflight(image: &RgbImage, mask: Option<&GrayImage>, max_pixel_area: u64) -> Result<()> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Err(PanelwerkError::EmptyImage);
    }
    if u64::from(width) * u64::from(height) > max_pixel_area {
        return Err(PanelwerkError::OversizedInput {
            width,
            height,
            max_pixels: max_pixel_area,
        });
    }
    if let Some(mask) = mask {
        let (mask_width, mask_height) = mask.dimensions();
        if (mask_width, mask_height) != (width, height) {
            return Err(PanelwerkError::MaskMismatch {
                width,
                height,
                mask_width,
                mask_height,
            });
        }
    }
    Ok(())
}

/// Map an HTTP status to an error class. `None` means success.
pub fn classify_status(status: u16) -> Option<ErrorClass> {
    match status {
        200..=299 => None,
        408 | 429 => Some(ErrorClass::Transient),
        500..=599 => Some(ErrorClass::Transient),
        _ => Some(ErrorClass::Fatal),
    }
}

// -- Wire format --------------------------------------------------------------

#[derive(Serialize)]
struct RestoreRequestBody {
    image: String,
    mask: Option<String>,
    scale_factor: u32,
    matte_compensation: f32,
    face_restore: bool,
    ocr: bool,
    strength: f32,
}

#[derive(Debug, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
enum ResponseStatus {
    Success,
    TransientError,
    FatalError,
}

#[derive(Debug, Deserialize)]
struct RestoreResponseBody {
    status: ResponseStatus,
    #[serde(default)]
    image: Option<String>,
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    retry_after_ms: Option<u64>,
}

fn encode_png<P>(image: &ImageBuffer<P, Vec<u8>>) -> Result<String>
where
    P: Pixel<Subpixel = u8> + PixelWithColorType,
{
    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .map_err(|err| PanelwerkError::ImageError(format!("PNG encoding failed: {err}")))?;
    Ok(STANDARD.encode(bytes))
}

fn build_body(request: &RestorationRequest<'_>) -> Result<RestoreRequestBody> {
    Ok(RestoreRequestBody {
        image: encode_png(request.image)?,
        mask: request.mask.map(encode_png).transpose()?,
        scale_factor: request.params.scale_factor.factor(),
        matte_compensation: request.params.matte_compensation,
        face_restore: request.params.face_restore,
        ocr: request.params.ocr,
        strength: request.params.strength,
    })
}

fn decode_buffer(encoded: &str) -> Result<RgbImage> {
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|err| PanelwerkError::ImageError(format!("invalid base64 image: {err}")))?;
    let decoded = image::load_from_memory(&bytes)
        .map_err(|err| PanelwerkError::ImageError(format!("undecodable restored image: {err}")))?;
    Ok(flatten_to_rgb(&decoded))
}

fn retry_after_ms(headers: &HeaderMap) -> Option<u64> {
    let seconds: u64 = headers.get(RETRY_AFTER)?.to_str().ok()?.trim().parse().ok()?;
    Some(seconds.saturating_mul(1000))
}

fn interpret(body: RestoreResponseBody, header_retry_after: Option<u64>) -> RestorationOutcome {
    let code = || body.error_code.clone().unwrap_or_else(|| "unspecified".into());
    match body.status {
        ResponseStatus::Success => match body.image.as_deref().map(decode_buffer) {
            Some(Ok(buffer)) => RestorationOutcome::Success { buffer },
            Some(Err(err)) => RestorationOutcome::fatal(err.to_string()),
            None => RestorationOutcome::fatal("success response carried no image"),
        },
        ResponseStatus::TransientError => RestorationOutcome::TransientFailure {
            reason: format!("service error {}", code()),
            retry_after_ms: body.retry_after_ms.or(header_retry_after),
        },
        ResponseStatus::FatalError => {
            RestorationOutcome::fatal(format!("service error {}", code()))
        }
    }
}

fn transport_outcome(err: &reqwest::Error) -> RestorationOutcome {
    if err.is_builder() {
        return RestorationOutcome::fatal(format!("request could not be built: {err}"));
    }
    let reason = if err.is_timeout() {
        format!("request timed out: {err}")
    } else if err.is_connect() {
        format!("connection failed: {err}")
    } else {
        format!("transport error: {err}")
    };
    RestorationOutcome::transient(reason)
}

// -- Hosted client ------------------------------------------------------------

/// HTTP client for the hosted restoration service. JSON in, JSON out, images
/// as base64 PNG, bearer-token auth.
pub struct HostedRestorationClient {
    http: Client,
    endpoint: String,
    token: String,
    max_pixel_area: u64,
}

impl HostedRestorationClient {
    pub fn new(config: &ServiceConfig, token: String) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|err| PanelwerkError::Config(format!("HTTP client setup failed: {err}")))?;
        Ok(Self {
            http,
            endpoint: config.endpoint.clone(),
            token,
            max_pixel_area: config.max_pixel_area,
        })
    }

    /// Build from config, reading the token from the configured variable.
    pub fn from_config(config: &ServiceConfig) -> Result<Self> {
        let token = config.resolve_token()?;
        Self::new(config, token)
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl RestorationClient for HostedRestorationClient {
    #[instrument(skip_all, fields(
        width = request.image.width(),
        height = request.image.height(),
        masked = request.mask.is_some(),
    ))]
    async fn submit(&self, request: &RestorationRequest<'_>) -> RestorationOutcome {
        if let Err(err) = preflight(request.image, request.mask, self.max_pixel_area) {
            warn!(error = %err, "Rejected before submission");
            return RestorationOutcome::fatal(err.to_string());
        }
        let body = match build_body(request) {
            Ok(body) => body,
            Err(err) => return RestorationOutcome::fatal(err.to_string()),
        };

        let response = match self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => return transport_outcome(&err),
        };

        let status = response.status();
        let header_retry_after = retry_after_ms(response.headers());
        debug!(status = status.as_u16(), "Service responded");

        if let Some(class) = classify_status(status.as_u16()) {
            let text = response.text().await.unwrap_or_default();
            let snippet: String = text.chars().take(MAX_REASON_BODY).collect();
            let reason = if snippet.is_empty() {
                format!("HTTP {status}")
            } else {
                format!("HTTP {status}: {snippet}")
            };
            return match class {
                ErrorClass::Transient => RestorationOutcome::TransientFailure {
                    reason,
                    retry_after_ms: header_retry_after,
                },
                ErrorClass::Fatal => RestorationOutcome::fatal(reason),
            };
        }

        match response.json::<RestoreResponseBody>().await {
            Ok(body) => interpret(body, header_retry_after),
            Err(err) if err.is_timeout() => transport_outcome(&err),
            Err(err) => RestorationOutcome::fatal(format!("malformed service response: {err}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, Rgb};
    use panelwerk_core::types::RestoreOptions;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    async fn read_request(socket: &mut TcpStream) {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 8192];
        loop {
            let n = socket.read(&mut chunk).await.expect("read");
            if n == 0 {
                return;
            }
            buf.extend_from_slice(&chunk[..n]);
            if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                let head = String::from_utf8_lossy(&buf[..pos]).to_ascii_lowercase();
                let len = head
                    .lines()
                    .find_map(|line| line.strip_prefix("content-length:"))
                    .and_then(|v| v.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if buf.len() >= pos + 4 + len {
                    return;
                }
            }
        }
    }

    /// Serve one canned response and return the endpoint URL.
    async fn serve_once(status: &'static str, extra_headers: &'static str, body: String) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.expect("accept");
            read_request(&mut socket).await;
            let response = format!(
                concat!(
                    "HTTP/1.1 {status}\r\n",
                    "Content-Type: application/json\r\n",
                    "Content-Length: {}\r\n",
                    "Connection: close\r\n",
                    "{extra_headers}\r\n{body}",
                ),
                body.len(),
                status = status,
                extra_headers = extra_headers,
                body = body,
            );
            socket.write_all(response.as_bytes()).await.expect("write");
            let _ = socket.shutdown().await;
        });
        format!("http://{addr}/v1/restore")
    }

    fn client(endpoint: String) -> HostedRestorationClient {
        let config = ServiceConfig {
            endpoint,
            timeout_secs: 5,
            ..Default::default()
        };
        HostedRestorationClient::new(&config, "test-token".into()).expect("client")
    }

    fn params() -> RestorationParams {
        RestorationParams::from_options(&RestoreOptions::default())
    }

    #[test]
    fn status_classification() {
        assert_eq!(classify_status(200), None);
        assert_eq!(classify_status(429), Some(ErrorClass::Transient));
        assert_eq!(classify_status(503), Some(ErrorClass::Transient));
        assert_eq!(classify_status(408), Some(ErrorClass::Transient));
        assert_eq!(classify_status(401), Some(ErrorClass::Fatal));
        assert_eq!(classify_status(422), Some(ErrorClass::Fatal));
    }

    #[test]
    fn preflight_rejects_bad_inputs() {
        let image = RgbImage::new(10, 10);
        assert!(preflight(&image, None, 100).is_ok());
        assert!(matches!(
            preflight(&RgbImage::new(0, 10), None, 100),
            Err(PanelwerkError::EmptyImage)
        ));
        assert!(matches!(
            preflight(&image, None, 99),
            Err(PanelwerkError::OversizedInput { .. })
        ));
        let mask = GrayImage::new(10, 9);
        assert!(matches!(
            preflight(&image, Some(&mask), 100),
            Err(PanelwerkError::MaskMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn success_body_is_decoded() {
        let restored = RgbImage::from_pixel(8, 6, Rgb([10, 20, 30]));
        let body = format!(
            r#"{{"status":"success","image":"{}"}}"#,
            encode_png(&restored).expect("encode")
        );
        let client = client(serve_once("200 OK", "", body).await);

        let image = RgbImage::new(4, 3);
        let mask = GrayImage::from_pixel(4, 3, Luma([255]));
        let params = params();
        let outcome = client
            .submit(&RestorationRequest {
                image: &image,
                mask: Some(&mask),
                params: &params,
            })
            .await;
        match outcome {
            RestorationOutcome::Success { buffer } => assert_eq!(buffer, restored),
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn rate_limit_is_transient_with_hint() {
        let endpoint = serve_once(
            "429 Too Many Requests",
            "Retry-After: 3\r\n",
            r#"{"error":"slow down"}"#.into(),
        )
        .await;
        let image = RgbImage::new(4, 4);
        let params = params();
        let outcome = client(endpoint)
            .submit(&RestorationRequest {
                image: &image,
                mask: None,
                params: &params,
            })
            .await;
        assert!(matches!(
            outcome,
            RestorationOutcome::TransientFailure {
                retry_after_ms: Some(3000),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn unauthorised_is_fatal() {
        let endpoint = serve_once("401 Unauthorized", "", "{}".into()).await;
        let image = RgbImage::new(4, 4);
        let params = params();
        let outcome = client(endpoint)
            .submit(&RestorationRequest {
                image: &image,
                mask: None,
                params: &params,
            })
            .await;
        assert!(matches!(outcome, RestorationOutcome::FatalFailure { .. }));
    }

    #[tokio::test]
    async fn body_level_transient_error() {
        let endpoint = serve_once(
            "200 OK",
            "",
            r#"{"status":"transient_error","error_code":"model_busy","retry_after_ms":1500}"#
                .into(),
        )
        .await;
        let image = RgbImage::new(4, 4);
        let params = params();
        let outcome = client(endpoint)
            .submit(&RestorationRequest {
                image: &image,
                mask: None,
                params: &params,
            })
            .await;
        match outcome {
            RestorationOutcome::TransientFailure {
                reason,
                retry_after_ms,
            } => {
                assert!(reason.contains("model_busy"));
                assert_eq!(retry_after_ms, Some(1500));
            }
            other => panic!("expected transient failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn refused_connection_is_transient() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);

        let image = RgbImage::new(4, 4);
        let params = params();
        let outcome = client(format!("http://{addr}/v1/restore"))
            .submit(&RestorationRequest {
                image: &image,
                mask: None,
                params: &params,
            })
            .await;
        assert!(matches!(outcome, RestorationOutcome::TransientFailure { .. }));
    }

    #[tokio::test]
    async fn mismatched_mask_never_reaches_the_wire() {
        // Nothing listens here; a network attempt would be transient, not fatal.
        let client = client("http://127.0.0.1:9/v1/restore".into());
        let image = RgbImage::new(4, 4);
        let mask = GrayImage::new(2, 2);
        let params = params();
        let outcome = client
            .submit(&RestorationRequest {
                image: &image,
                mask: Some(&mask),
                params: &params,
            })
            .await;
        match outcome {
            RestorationOutcome::FatalFailure { reason } => assert!(reason.contains("mask")),
            other => panic!("expected fatal failure, got {other:?}"),
        }
    }

    #[test]
    fn outcomes_convert_to_service_errors() {
        let ok = RestorationOutcome::Success {
            buffer: RgbImage::new(2, 2),
        };
        assert_eq!(ok.into_result().expect("buffer").dimensions(), (2, 2));

        let transient = RestorationOutcome::TransientFailure {
            reason: "HTTP 503".into(),
            retry_after_ms: Some(750),
        };
        match transient.into_result() {
            Err(err @ PanelwerkError::ServiceTransient { .. }) => assert!(err.is_transient()),
            other => panic!("expected transient error, got {other:?}"),
        }

        let fatal = RestorationOutcome::fatal("HTTP 401").into_result();
        assert!(matches!(fatal, Err(PanelwerkError::ServiceFatal(ref r)) if r == "HTTP 401"));
    }
}
