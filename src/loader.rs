use crate::bounds::Aabb;
use anyhow::{anyhow, bail, Context, Result};
use glam::{Mat4, Vec3};
use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering as AtomicOrdering};
use std::sync::{mpsc, Arc};
use std::thread;

const LOADER_QUEUE_DEPTH: usize = 64;

/// Shared flag telling a pending load its result is no longer wanted.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, AtomicOrdering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(AtomicOrdering::Acquire)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ContentMesh {
    pub name: String,
    /// Bounds in the content root's space.
    pub bounds: Aabb,
}

/// Visual content for a model, attached under its placeholder container once loaded.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelContent {
    pub meshes: Vec<ContentMesh>,
}

impl ModelContent {
    pub fn single(name: impl Into<String>, bounds: Aabb) -> Self {
        Self { meshes: vec![ContentMesh { name: name.into(), bounds }] }
    }

    pub fn bounds(&self) -> Aabb {
        self.meshes.iter().fold(Aabb::EMPTY, |acc, mesh| acc.union(mesh.bounds))
    }
}

pub type LoadResult = Result<ModelContent>;

/// Asynchronous model source. `load` returns immediately; the result arrives on the
/// receiver on a later frame.
pub trait AssetLoader {
    fn load(&mut self, uri: &str, cancel: CancelToken) -> mpsc::Receiver<LoadResult>;

    /// Fraction of requested loads that have finished, in `[0, 1]`.
    fn poll_progress(&self) -> f32;
}

fn progress(requested: usize, completed: usize) -> f32 {
    if requested == 0 {
        1.0
    } else {
        (completed as f32 / requested as f32).clamp(0.0, 1.0)
    }
}

// ---------- glTF loader ----------

struct GltfLoadJob {
    path: PathBuf,
    cancel: CancelToken,
    reply: mpsc::Sender<LoadResult>,
}

/// Loads glTF/GLB bounds on background worker threads.
pub struct GltfAssetLoader {
    asset_root: PathBuf,
    senders: Vec<mpsc::SyncSender<GltfLoadJob>>,
    next_sender: usize,
    requested: usize,
    completed: Arc<AtomicUsize>,
}

impl GltfAssetLoader {
    pub fn new(asset_root: impl Into<PathBuf>, worker_count: usize) -> Result<Self> {
        let worker_count = worker_count.clamp(1, 8);
        let completed = Arc::new(AtomicUsize::new(0));
        let mut senders = Vec::with_capacity(worker_count);
        for index in 0..worker_count {
            let (tx, rx) = mpsc::sync_channel::<GltfLoadJob>(LOADER_QUEUE_DEPTH);
            let thread_completed = Arc::clone(&completed);
            thread::Builder::new()
                .name(format!("model-loader-{index}"))
                .spawn(move || {
                    while let Ok(job) = rx.recv() {
                        run_gltf_load_job(job);
                        thread_completed.fetch_add(1, AtomicOrdering::Relaxed);
                    }
                })
                .context("spawning model loader worker")?;
            senders.push(tx);
        }
        Ok(Self { asset_root: asset_root.into(), senders, next_sender: 0, requested: 0, completed })
    }

    pub fn resolve_path(&self, uri: &str) -> PathBuf {
        let trimmed = uri.strip_prefix("file://").unwrap_or(uri);
        let path = Path::new(trimmed);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.asset_root.join(path)
        }
    }
}

impl AssetLoader for GltfAssetLoader {
    fn load(&mut self, uri: &str, cancel: CancelToken) -> mpsc::Receiver<LoadResult> {
        let (reply, rx) = mpsc::channel();
        self.requested += 1;
        let mut job = GltfLoadJob { path: self.resolve_path(uri), cancel, reply };
        let len = self.senders.len();
        for offset in 0..len {
            let idx = (self.next_sender + offset) % len;
            match self.senders[idx].try_send(job) {
                Ok(()) => {
                    self.next_sender = (idx + 1) % len;
                    return rx;
                }
                Err(mpsc::TrySendError::Full(returned)) | Err(mpsc::TrySendError::Disconnected(returned)) => {
                    job = returned;
                }
            }
        }
        tracing::warn!(target: "loader", uri, "all loader queues are full; loading inline");
        run_gltf_load_job(job);
        self.completed.fetch_add(1, AtomicOrdering::Relaxed);
        rx
    }

    fn poll_progress(&self) -> f32 {
        progress(self.requested, self.completed.load(AtomicOrdering::Relaxed))
    }
}

fn run_gltf_load_job(job: GltfLoadJob) {
    let GltfLoadJob { path, cancel, reply } = job;
    if cancel.is_cancelled() {
        return;
    }
    let result = load_gltf_content(&path);
    if cancel.is_cancelled() {
        return;
    }
    let _ = reply.send(result);
}

/// Reads mesh bounds from accessor min/max, placed by their node transforms.
pub fn load_gltf_content(path: impl AsRef<Path>) -> Result<ModelContent> {
    let path = path.as_ref();
    let document = gltf::Gltf::open(path).with_context(|| format!("Opening glTF {}", path.display()))?;
    let scene = document
        .default_scene()
        .or_else(|| document.scenes().next())
        .ok_or_else(|| anyhow!("glTF {} has no scenes", path.display()))?;
    let mut content = ModelContent::default();
    let mut stack: Vec<(gltf::Node, Mat4)> = scene.nodes().map(|node| (node, Mat4::IDENTITY)).collect();
    while let Some((node, parent)) = stack.pop() {
        let world = parent * Mat4::from_cols_array_2d(&node.transform().matrix());
        if let Some(mesh) = node.mesh() {
            let name = mesh.name().or(node.name()).unwrap_or("mesh").to_string();
            for primitive in mesh.primitives() {
                let bb = primitive.bounding_box();
                let bounds = Aabb::new(Vec3::from(bb.min), Vec3::from(bb.max)).transformed(&world);
                content.meshes.push(ContentMesh { name: name.clone(), bounds });
            }
        }
        stack.extend(node.children().map(|child| (child, world)));
    }
    if content.meshes.is_empty() {
        bail!("glTF {} contains no meshes", path.display());
    }
    Ok(content)
}

// ---------- host-resolved loader ----------

struct ManualRequest {
    uri: String,
    cancel: CancelToken,
    reply: mpsc::Sender<LoadResult>,
}

/// Handle for resolving loads issued through a [`ManualAssetLoader`].
#[derive(Clone, Default)]
pub struct ManualLoadQueue {
    requests: Rc<RefCell<Vec<ManualRequest>>>,
}

impl ManualLoadQueue {
    pub fn pending(&self) -> Vec<String> {
        self.requests.borrow().iter().map(|request| request.uri.clone()).collect()
    }

    pub fn is_cancelled(&self, uri: &str) -> bool {
        self.requests.borrow().iter().any(|request| request.uri == uri && request.cancel.is_cancelled())
    }

    /// Completes the oldest pending request for `uri`. Returns false if none is pending.
    pub fn resolve(&self, uri: &str, content: ModelContent) -> bool {
        self.complete(uri, Ok(content))
    }

    pub fn fail(&self, uri: &str, reason: &str) -> bool {
        self.complete(uri, Err(anyhow!("{reason}")))
    }

    fn complete(&self, uri: &str, result: LoadResult) -> bool {
        let mut requests = self.requests.borrow_mut();
        let Some(index) = requests.iter().position(|request| request.uri == uri) else {
            return false;
        };
        let request = requests.remove(index);
        let _ = request.reply.send(result);
        true
    }
}

/// Loader whose requests are fulfilled by the host through a [`ManualLoadQueue`].
pub struct ManualAssetLoader {
    queue: ManualLoadQueue,
    requested: usize,
}

impl ManualAssetLoader {
    pub fn new() -> (Self, ManualLoadQueue) {
        let queue = ManualLoadQueue::default();
        (Self { queue: queue.clone(), requested: 0 }, queue)
    }
}

impl AssetLoader for ManualAssetLoader {
    fn load(&mut self, uri: &str, cancel: CancelToken) -> mpsc::Receiver<LoadResult> {
        let (reply, rx) = mpsc::channel();
        self.requested += 1;
        self.queue.requests.borrow_mut().push(ManualRequest { uri: uri.to_string(), cancel, reply });
        rx
    }

    fn poll_progress(&self) -> f32 {
        let pending = self.queue.requests.borrow().len();
        progress(self.requested, self.requested.saturating_sub(pending))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
    use std::io::Write;

    fn triangle_gltf() -> String {
        let buffer = BASE64.encode([0u8; 36]);
        format!(
            r#"{{
            "asset": {{"version": "2.0"}},
            "scene": 0,
            "scenes": [{{"nodes": [0]}}],
            "nodes": [{{"mesh": 0, "translation": [0.0, 1.0, 0.0]}}],
            "meshes": [{{"name": "tri", "primitives": [{{"attributes": {{"POSITION": 0}}}}]}}],
            "buffers": [{{"byteLength": 36, "uri": "data:application/octet-stream;base64,{buffer}"}}],
            "bufferViews": [{{"buffer": 0, "byteLength": 36}}],
            "accessors": [{{
                "bufferView": 0, "componentType": 5126, "count": 3, "type": "VEC3",
                "min": [-1.0, 0.0, 0.0], "max": [1.0, 2.0, 0.0]
            }}]
        }}"#
        )
    }

    #[test]
    fn gltf_bounds_follow_node_transform() {
        let mut file = tempfile::Builder::new().suffix(".gltf").tempfile().expect("temp gltf");
        file.write_all(triangle_gltf().as_bytes()).expect("write gltf");
        let content = load_gltf_content(file.path()).expect("gltf loads");
        assert_eq!(content.meshes.len(), 1);
        assert_eq!(content.meshes[0].name, "tri");
        let bounds = content.bounds();
        assert!((bounds.min.y - 1.0).abs() < 1e-6);
        assert!((bounds.max.y - 3.0).abs() < 1e-6);
    }

    #[test]
    fn missing_file_reports_error() {
        assert!(load_gltf_content("definitely/not/here.glb").is_err());
    }

    #[test]
    fn manual_loader_tracks_progress_and_cancellation() {
        let (mut loader, queue) = ManualAssetLoader::new();
        let token = CancelToken::new();
        let rx = loader.load("a.glb", token.clone());
        let _other = loader.load("b.glb", CancelToken::new());
        assert_eq!(loader.poll_progress(), 0.0);
        token.cancel();
        assert!(queue.is_cancelled("a.glb"));
        assert!(queue.resolve("a.glb", ModelContent::single("a", Aabb::from_half_extents(Vec3::ONE))));
        assert!(rx.try_recv().expect("result delivered").is_ok());
        assert!((loader.poll_progress() - 0.5).abs() < 1e-6);
        assert!(!queue.resolve("a.glb", ModelContent::default()));
    }

    #[test]
    fn worker_loader_delivers_result() {
        let mut file = tempfile::Builder::new().suffix(".gltf").tempfile().expect("temp gltf");
        file.write_all(triangle_gltf().as_bytes()).expect("write gltf");
        let mut loader = GltfAssetLoader::new(".", 1).expect("loader");
        let uri = file.path().to_string_lossy().to_string();
        let rx = loader.load(&uri, CancelToken::new());
        let result = rx.recv_timeout(std::time::Duration::from_secs(5)).expect("worker replied");
        assert!(result.is_ok());
    }
}
