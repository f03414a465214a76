//! Inference backend contract and the built-in stand-in implementation.
//!
//! The serving pipeline only ever sees the four-step trait: load a model,
//! preprocess bytes into a tensor, run inference, postprocess into result
//! text. A real runtime (ONNX, torch bindings) plugs in behind the same
//! seam; [`StubClassifier`] keeps the pipeline runnable and deterministic
//! without one.

use std::fmt;

#[derive(Debug)]
pub enum BackendError {
    Load(String),
    Preprocess(String),
    Infer(String),
    Postprocess(String),
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendError::Load(m) => write!(f, "model load failed: {m}"),
            BackendError::Preprocess(m) => write!(f, "preprocess failed: {m}"),
            BackendError::Infer(m) => write!(f, "inference failed: {m}"),
            BackendError::Postprocess(m) => write!(f, "postprocess failed: {m}"),
        }
    }
}

impl std::error::Error for BackendError {}

/// Dense tensor handed between the backend steps. Shape is row-major.
pub struct Tensor {
    pub data: Vec<f32>,
    pub shape: Vec<usize>,
}

/// The external inference contract. Each step may fail independently; the
/// worker treats any failure the same way (one failure completion) and
/// only logs which step broke.
pub trait InferenceBackend {
    /// Make `model_name` the current model. The worker calls this only
    /// when the requested name differs from the one already loaded.
    fn load(&mut self, model_name: &str) -> Result<(), BackendError>;

    /// Decode raw image bytes into the model's input tensor.
    fn preprocess(&mut self, image: &[u8]) -> Result<Tensor, BackendError>;

    /// Run the current model over the input tensor.
    fn infer(&mut self, input: Tensor) -> Result<Tensor, BackendError>;

    /// Reduce the output tensor to result text in
    /// `('label', 'p.pppp'), ...` form.
    fn postprocess(&mut self, output: Tensor) -> Result<String, BackendError>;
}

const LABELS: [&str; 8] = [
    "tabby",
    "golden_retriever",
    "sports_car",
    "espresso",
    "park_bench",
    "airliner",
    "acoustic_guitar",
    "lighthouse",
];

const TOP_K: usize = 5;

/// Deterministic classifier stub: byte histogram folded into a fixed label
/// set. Knows a small model list so unknown-model requests exercise the
/// failure path end to end.
pub struct StubClassifier {
    known_models: &'static [&'static str],
    loaded: Option<String>,
}

impl StubClassifier {
    pub fn new() -> Self {
        Self {
            known_models: &["resnet18", "resnet50", "mobilenet_v2"],
            loaded: None,
        }
    }

    pub fn loaded_model(&self) -> Option<&str> {
        self.loaded.as_deref()
    }
}

impl Default for StubClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl InferenceBackend for StubClassifier {
    fn load(&mut self, model_name: &str) -> Result<(), BackendError> {
        if self.known_models.contains(&model_name) {
            self.loaded = Some(model_name.to_string());
            Ok(())
        } else {
            // A failed load leaves no model resident.
            self.loaded = None;
            Err(BackendError::Load(format!("unknown model '{model_name}'")))
        }
    }

    fn preprocess(&mut self, image: &[u8]) -> Result<Tensor, BackendError> {
        if self.loaded.is_none() {
            return Err(BackendError::Preprocess("no model loaded".into()));
        }
        if image.is_empty() {
            return Err(BackendError::Preprocess("empty image".into()));
        }
        let data: Vec<f32> = image.iter().map(|&b| b as f32 / 255.0).collect();
        let shape = vec![1, data.len()];
        Ok(Tensor { data, shape })
    }

    fn infer(&mut self, input: Tensor) -> Result<Tensor, BackendError> {
        if self.loaded.is_none() {
            return Err(BackendError::Infer("no model loaded".into()));
        }
        if input.data.is_empty() {
            return Err(BackendError::Infer("empty input tensor".into()));
        }
        let mut scores = vec![0.0f32; LABELS.len()];
        for (i, v) in input.data.iter().enumerate() {
            scores[i % LABELS.len()] += v;
        }
        let sum: f32 = scores.iter().sum();
        if sum > 0.0 {
            for s in &mut scores {
                *s /= sum;
            }
        }
        Ok(Tensor {
            data: scores,
            shape: vec![1, LABELS.len()],
        })
    }

    fn postprocess(&mut self, output: Tensor) -> Result<String, BackendError> {
        if output.data.len() != LABELS.len() {
            return Err(BackendError::Postprocess(format!(
                "unexpected output length {}",
                output.data.len()
            )));
        }
        let mut ranked: Vec<(usize, f32)> = output.data.iter().copied().enumerate().collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        let text = ranked
            .iter()
            .take(TOP_K)
            .map(|&(i, p)| format!("('{}', '{:.4}')", LABELS[i], p))
            .collect::<Vec<_>>()
            .join(", ");
        Ok(text)
    }
}

/// Fixture classified when a request carries no payload (benchmarking
/// path).
pub fn fallback_image() -> &'static [u8] {
    static FIXTURE: [u8; 1024] = build_fixture();
    &FIXTURE
}

const fn build_fixture() -> [u8; 1024] {
    let mut buf = [0u8; 1024];
    let mut i = 0;
    while i < buf.len() {
        buf[i] = (i % 251) as u8;
        i += 1;
    }
    buf
}
