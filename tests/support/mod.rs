#![allow(dead_code)]

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use image::{DynamicImage, ImageBuffer, ImageOutputFormat, Rgb};
use serde_json::Value;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use styled_image_captioner::{
    captioner::{finish_caption, placeholder_confidence, Caption, CaptionError, Captioner},
    router,
    state::AppState,
    styles::Style,
};
use tempfile::TempDir;
use tower::ServiceExt;

/// Stands in for the model bundle: captions every image with its style's seed phrase.
#[derive(Default)]
pub struct FakeCaptioner {
    calls: AtomicUsize,
    fail: bool,
    panics: bool,
}

impl FakeCaptioner {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Captioner for FakeCaptioner {
    fn caption(&self, image: &DynamicImage, style: Style) -> Result<Caption, CaptionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.panics {
            panic!("tensor shape mismatch at /secret/weights/gpt2");
        }
        if self.fail {
            return Err(CaptionError::Tokenizer("model exploded".into()));
        }
        Ok(Caption {
            text: finish_caption(&format!(
                "{} a {}x{} test card ",
                style.seed_phrase(),
                image.width(),
                image.height()
            )),
            confidence: placeholder_confidence(&mut rand::thread_rng()),
        })
    }
}

pub struct TestApp {
    pub router: Router,
    pub captioner: Arc<FakeCaptioner>,
    pub upload_dir: TempDir,
}

impl TestApp {
    pub fn new() -> Self {
        Self::build(FakeCaptioner::default(), true)
    }

    pub fn failing() -> Self {
        Self::build(
            FakeCaptioner {
                fail: true,
                ..Default::default()
            },
            true,
        )
    }

    pub fn panicking() -> Self {
        Self::build(
            FakeCaptioner {
                panics: true,
                ..Default::default()
            },
            true,
        )
    }

    pub fn without_models() -> Self {
        Self::build(FakeCaptioner::default(), false)
    }

    fn build(captioner: FakeCaptioner, loaded: bool) -> Self {
        let upload_dir = tempfile::tempdir().unwrap();
        let captioner = Arc::new(captioner);
        let shared: Option<Arc<dyn Captioner>> = if loaded {
            Some(captioner.clone() as Arc<dyn Captioner>)
        } else {
            None
        };
        let state = AppState::new(shared, "cpu", upload_dir.path());

        Self {
            router: router(Arc::new(state)),
            captioner,
            upload_dir,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.send(Request::get(uri).body(Body::empty()).unwrap())
            .await
    }

    pub fn staged_files(&self) -> usize {
        std::fs::read_dir(self.upload_dir.path()).unwrap().count()
    }
}

/// Hand-built `multipart/form-data` body.
pub struct Form {
    boundary: &'static str,
    body: Vec<u8>,
}

impl Form {
    pub fn new() -> Self {
        Self {
            boundary: "----captioner-test-boundary",
            body: Vec::new(),
        }
    }

    pub fn file(mut self, field: &str, filename: &str, bytes: &[u8]) -> Self {
        self.body.extend_from_slice(
            format!(
                concat!(
                    "--{}\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                    "Content-Type: application/octet-stream\r\n\r\n"
                ),
                self.boundary, field, filename
            )
            .as_bytes(),
        );
        self.body.extend_from_slice(bytes);
        self.body.extend_from_slice(b"\r\n");
        self
    }

    pub fn text(mut self, field: &str, value: &str) -> Self {
        self.body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                self.boundary, field, value
            )
            .as_bytes(),
        );
        self
    }

    pub fn post(mut self, uri: &str) -> Request<Body> {
        self.body
            .extend_from_slice(format!("--{}--\r\n", self.boundary).as_bytes());
        Request::post(uri)
            .header(
                "content-type",
                format!("multipart/form-data; boundary={}", self.boundary),
            )
            .body(Body::from(self.body))
            .unwrap()
    }
}

pub fn png(width: u32, height: u32) -> Vec<u8> {
    let image = DynamicImage::ImageRgb8(ImageBuffer::from_pixel(width, height, Rgb([220, 40, 40])));
    let mut bytes = Vec::new();
    image
        .write_to(&mut std::io::Cursor::new(&mut bytes), ImageOutputFormat::Png)
        .unwrap();
    bytes
}
