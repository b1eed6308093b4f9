//! Inference invoker: runs the process-wide model off the async executor

use crate::error::{Error, Result};
use imagent::{ImageTransformer, RgbImage, TransformParams};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

type SharedModel = Arc<Mutex<Box<dyn ImageTransformer + Send>>>;

/// Handle to the loaded model.
///
/// Built once at startup and injected into the message handler. Calls are serialized
/// by the inner mutex, so at most one inference holds the device at a time.
#[derive(Clone)]
pub struct InferenceInvoker {
    model: SharedModel,
    backend: &'static str,
    base: TransformParams,
}

impl InferenceInvoker {
    /// `base` supplies the parameters that are not passed per call (steps, prompt, seed)
    pub fn new(model: Box<dyn ImageTransformer + Send>, base: TransformParams) -> Self {
        let backend = model.name();
        Self {
            model: Arc::new(Mutex::new(model)),
            backend,
            base,
        }
    }

    pub fn backend(&self) -> &'static str {
        self.backend
    }

    /// Run one transformation and return its single output image.
    ///
    /// Every failure inside the model, including a panic on the worker thread, comes
    /// back as `Error::Processing`.
    pub async fn transform(
        &self,
        image: RgbImage,
        strength: f64,
        guidance_scale: f64,
    ) -> Result<RgbImage> {
        let params = TransformParams {
            strength,
            guidance_scale,
            ..self.base.clone()
        };
        params
            .validate()
            .map_err(|e| Error::Processing(e.to_string()))?;

        let model = Arc::clone(&self.model);
        let started = Instant::now();

        let output = tokio::task::spawn_blocking(move || {
            // weights are read-only, so a panic in an earlier call leaves them usable
            let mut model = model.lock().unwrap_or_else(PoisonError::into_inner);
            model
                .transform(&image, &params)
                .map_err(|e| Error::Processing(e.to_string()))
        })
        .await
        .map_err(|e| Error::Processing(format!("inference task failed: {e}")))??;

        tracing::info!(
            backend = self.backend,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "inference completed"
        );

        Ok(output)
    }
}
