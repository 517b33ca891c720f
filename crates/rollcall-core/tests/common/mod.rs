//! Fakes shared by the flow tests: a scripted model backend, an in-memory
//! camera, and an event recorder.

#![allow(dead_code)]

use async_trait::async_trait;
use rollcall_core::photo::encode_data_url;
use rollcall_core::{
    spawn_extractor, BackendError, CameraError, CameraSource, CameraStream, Descriptor,
    DescriptorExtractor, FaceBackend, FlowEvents, Frame, Identity, IdentityId,
    VerificationStatus, WorkArea,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;

pub fn desc(values: &[f32]) -> Descriptor {
    Descriptor::new(values.to_vec(), None)
}

pub fn identity(first_name: &str, descriptor: Option<Descriptor>) -> Identity {
    Identity {
        id: IdentityId::new(),
        first_name: first_name.into(),
        last_name: "Example".into(),
        bonus_number: "123".into(),
        payroll_number: "12345678".into(),
        work_areas: vec![WorkArea::Picking],
        photo: Some(encode_data_url(&photo()).unwrap()),
        descriptor,
        enrolled_at: None,
    }
}

pub fn photo() -> Frame {
    Frame::new(vec![128; 16], 4, 4)
}

/// Descriptors handed out in order, then `fallback` forever.
#[derive(Clone)]
pub struct Script {
    steps: Arc<Mutex<VecDeque<Option<Descriptor>>>>,
    fallback: Option<Descriptor>,
    calls: Arc<AtomicUsize>,
}

impl Script {
    pub fn new(steps: Vec<Option<Descriptor>>, fallback: Option<Descriptor>) -> Self {
        Self {
            steps: Arc::new(Mutex::new(steps.into())),
            fallback,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next(&self) -> Option<Descriptor> {
        self.steps
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

struct ScriptedBackend {
    script: Script,
    /// When set, every call blocks until the test sends on (or drops) the gate.
    gate: Option<mpsc::Receiver<()>>,
}

impl FaceBackend for ScriptedBackend {
    fn is_ready(&self) -> bool {
        true
    }

    fn detect_and_describe(&mut self, _frame: &Frame) -> Result<Option<Descriptor>, BackendError> {
        self.script.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            let _ = gate.recv();
        }
        Ok(self.script.next())
    }
}

pub async fn ready_extractor(script: &Script) -> DescriptorExtractor {
    let backend = ScriptedBackend {
        script: script.clone(),
        gate: None,
    };
    let extractor = spawn_extractor(move || Ok(backend));
    extractor.wait_ready().await.unwrap();
    extractor
}

pub async fn gated_extractor(script: &Script) -> (DescriptorExtractor, mpsc::Sender<()>) {
    let (gate_tx, gate_rx) = mpsc::channel();
    let backend = ScriptedBackend {
        script: script.clone(),
        gate: Some(gate_rx),
    };
    let extractor = spawn_extractor(move || Ok(backend));
    extractor.wait_ready().await.unwrap();
    (extractor, gate_tx)
}

/// Extractor whose models never load.
pub async fn broken_extractor() -> DescriptorExtractor {
    let extractor = spawn_extractor(|| {
        Err::<ScriptedBackend, _>(BackendError::Other("model file missing".into()))
    });
    assert!(extractor.wait_ready().await.is_err());
    extractor
}

#[derive(Default)]
pub struct FakeCamera {
    pub fail_with: Option<CameraError>,
    pub acquired: AtomicUsize,
    pub released: Arc<AtomicBool>,
}

impl FakeCamera {
    pub fn working() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing(error: CameraError) -> Arc<Self> {
        Arc::new(Self {
            fail_with: Some(error),
            ..Self::default()
        })
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CameraSource for FakeCamera {
    async fn acquire(&self) -> Result<Box<dyn CameraStream>, CameraError> {
        if let Some(e) = &self.fail_with {
            return Err(e.clone());
        }
        self.acquired.fetch_add(1, Ordering::SeqCst);
        self.released.store(false, Ordering::SeqCst);
        Ok(Box::new(FakeStream {
            released: self.released.clone(),
            sequence: 0,
        }))
    }
}

struct FakeStream {
    released: Arc<AtomicBool>,
    sequence: u32,
}

#[async_trait]
impl CameraStream for FakeStream {
    async fn next_frame(&mut self) -> Result<Option<Frame>, CameraError> {
        if self.released.load(Ordering::SeqCst) {
            return Err(CameraError::Released);
        }
        let mut frame = photo();
        frame.sequence = self.sequence;
        self.sequence += 1;
        Ok(Some(frame))
    }

    fn release(&mut self) {
        self.released.store(true, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct Recorder {
    pub successes: Mutex<Vec<Identity>>,
    pub extraction_failures: AtomicUsize,
    pub camera_errors: Mutex<Vec<CameraError>>,
    pub statuses: Mutex<Vec<VerificationStatus>>,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn success_count(&self) -> usize {
        self.successes.lock().unwrap().len()
    }

    pub fn saw_message(&self, message: &str) -> bool {
        self.statuses.lock().unwrap().iter().any(|s| s.message == message)
    }
}

impl FlowEvents for Recorder {
    fn on_verification_success(&self, identity: &Identity) {
        self.successes.lock().unwrap().push(identity.clone());
    }

    fn on_extraction_failure(&self) {
        self.extraction_failures.fetch_add(1, Ordering::SeqCst);
    }

    fn on_camera_error(&self, error: &CameraError) {
        self.camera_errors.lock().unwrap().push(error.clone());
    }

    fn on_status(&self, status: &VerificationStatus) {
        self.statuses.lock().unwrap().push(status.clone());
    }
}

/// Poll `cond` until it holds or two seconds pass.
pub async fn eventually(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    cond()
}
