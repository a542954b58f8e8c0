//! # Interactive Alignment Sessions
//!
//! Live, per-user alignment of two drawings. A client loads a pair, nudges
//! offset, scale, rotation, opacity and line thickness, and pulls a freshly
//! composited image whenever it wants to see the result.
//!
//! ## State Machine
//!
//! ```text
//!   create ──► Unloaded ──load──► Loaded ◄──┐
//!                                  │  │     │ set_* / reset
//!                                  │  └─────┘
//!                                  └──► render / save (state unchanged)
//! ```
//!
//! ## Concurrency
//!
//! Sessions are keyed by [`SessionId`]. Each session sits behind its own
//! mutex, so two clients adjusting the same session are serialized while
//! different sessions never contend. Every mutating call returns an
//! immutable [`SessionSnapshot`].
//!
//! ## Rendering
//!
//! Rendering always uses intersection mode: the lower drawing in one channel,
//! the upper (transformed) drawing in another, and pixels inked in both in a
//! dedicated colour. Nothing is cached; each render recomputes from the live
//! parameters.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use image::{GrayImage, RgbImage};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info};

use archidiff_scale::presets::{SizeConvention, common_size};

use crate::config::SessionDefaults;
use crate::core::morphology::dilate_rect;
use crate::core::{GeometricTransform, RasterImage};
use crate::error::{DiffError, DiffResult};
use crate::processing::composite::{BlendMode, CompositeConfig, StructureSignal, compose_signals, invert};
use crate::processing::normalize::transform_signal;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SessionId(u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Unloaded,
    Loaded,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Unloaded => write!(f, "unloaded"),
            SessionState::Loaded => write!(f, "loaded"),
        }
    }
}

/// Immutable view of a session after an operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub id: SessionId,
    pub state: SessionState,
    pub transform: GeometricTransform,
    pub opacity: f32,
    pub thickness: u32,
    /// Shared frame size once loaded.
    pub size: Option<(u32, u32)>,
}

#[derive(Debug)]
struct AlignmentSession {
    id: SessionId,
    layers: Option<(RasterImage, RasterImage)>,
    transform: GeometricTransform,
    opacity: f32,
    thickness: u32,
}

impl AlignmentSession {
    fn new(id: SessionId, defaults: &SessionDefaults) -> Self {
        Self {
            id,
            layers: None,
            transform: GeometricTransform::identity(),
            opacity: defaults.opacity,
            thickness: defaults.thickness,
        }
    }

    fn state(&self) -> SessionState {
        if self.layers.is_some() {
            SessionState::Loaded
        } else {
            SessionState::Unloaded
        }
    }

    fn reset(&mut self, defaults: &SessionDefaults) {
        self.transform = GeometricTransform::identity();
        self.opacity = defaults.opacity;
        self.thickness = defaults.thickness;
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            id: self.id,
            state: self.state(),
            transform: self.transform,
            opacity: self.opacity,
            thickness: self.thickness,
            size: self.layers.as_ref().map(|(lower, _)| lower.dimensions()),
        }
    }

    fn render(&self, defaults: &SessionDefaults) -> DiffResult<RgbImage> {
        let (lower, upper) = self
            .layers
            .as_ref()
            .ok_or_else(|| DiffError::state(self.state().to_string(), "render", "load two drawings first"))?;
        let lower_signal = dilate_rect(&invert(&lower.to_gray()), self.thickness);
        // Thicken before warping so stroke width follows the scale.
        let upper_signal: GrayImage =
            transform_signal(&dilate_rect(&invert(&upper.to_gray()), self.thickness), &self.transform)?;
        let config = CompositeConfig {
            reference_channel: defaults.lower_channel,
            comparison_channel: defaults.upper_channel,
            opacity: self.opacity,
            thickness: self.thickness,
            blend: BlendMode::Intersection {
                threshold: defaults.presence_threshold,
                color: defaults.both_color,
            },
            signal: StructureSignal::Inverted,
        };
        compose_signals(&lower_signal, &upper_signal, &config)
    }
}

type Shared = Arc<Mutex<AlignmentSession>>;

/// All live alignment sessions.
#[derive(Debug)]
pub struct SessionStore {
    defaults: SessionDefaults,
    next_id: AtomicU64,
    sessions: Mutex<HashMap<SessionId, Shared>>,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(SessionDefaults::default())
    }
}

impl SessionStore {
    pub fn new(defaults: SessionDefaults) -> Self {
        Self {
            defaults,
            next_id: AtomicU64::new(1),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn defaults(&self) -> &SessionDefaults {
        &self.defaults
    }

    /// Open an empty session.
    pub async fn create(&self) -> SessionId {
        let id = SessionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let session = AlignmentSession::new(id, &self.defaults);
        self.sessions.lock().await.insert(id, Arc::new(Mutex::new(session)));
        debug!(%id, "session created");
        id
    }

    /// Drop a session. Returns whether it existed.
    pub async fn close(&self, id: SessionId) -> bool {
        self.sessions.lock().await.remove(&id).is_some()
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn get(&self, id: SessionId) -> DiffResult<Shared> {
        self.sessions
            .lock()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| DiffError::validation("session_id", "must name an open session", id.to_string()))
    }

    async fn update(
        &self,
        id: SessionId,
        f: impl FnOnce(&mut AlignmentSession, &SessionDefaults) -> DiffResult<()>,
    ) -> DiffResult<SessionSnapshot> {
        let shared = self.get(id).await?;
        let mut session = shared.lock().await;
        f(&mut session, &self.defaults)?;
        Ok(session.snapshot())
    }

    /// Load two drawings; both grow to the larger of their sizes and all
    /// parameters return to their defaults.
    pub async fn load(&self, id: SessionId, lower: RasterImage, upper: RasterImage) -> DiffResult<SessionSnapshot> {
        let target = common_size(lower.size(), upper.size(), SizeConvention::Larger);
        let lower = lower.resized_to(target)?;
        let upper = upper.resized_to(target)?;
        let snapshot = self
            .update(id, |s, d| {
                s.layers = Some((lower, upper));
                s.reset(d);
                Ok(())
            })
            .await?;
        info!(%id, size = %target, "session loaded");
        Ok(snapshot)
    }

    pub async fn snapshot(&self, id: SessionId) -> DiffResult<SessionSnapshot> {
        self.update(id, |_, _| Ok(())).await
    }

    /// Pixel offset of the upper drawing.
    pub async fn set_offset(&self, id: SessionId, x: f64, y: f64) -> DiffResult<SessionSnapshot> {
        finite("translate_x", x)?;
        finite("translate_y", y)?;
        self.update(id, |s, _| {
            s.transform.translate_x = x;
            s.transform.translate_y = y;
            Ok(())
        })
        .await
    }

    pub async fn set_opacity(&self, id: SessionId, opacity: f32) -> DiffResult<SessionSnapshot> {
        if !(0.0..=1.0).contains(&opacity) {
            return Err(DiffError::validation("opacity", "must be within 0.0..=1.0", opacity.to_string()));
        }
        self.update(id, |s, _| {
            s.opacity = opacity;
            Ok(())
        })
        .await
    }

    /// Uniform scale: sets both axes.
    pub async fn set_scale(&self, id: SessionId, scale: f64) -> DiffResult<SessionSnapshot> {
        positive("scale", scale)?;
        self.update(id, |s, _| {
            s.transform.scale_x = scale;
            s.transform.scale_y = scale;
            Ok(())
        })
        .await
    }

    pub async fn set_scale_x(&self, id: SessionId, scale: f64) -> DiffResult<SessionSnapshot> {
        positive("scale_x", scale)?;
        self.update(id, |s, _| {
            s.transform.scale_x = scale;
            Ok(())
        })
        .await
    }

    pub async fn set_scale_y(&self, id: SessionId, scale: f64) -> DiffResult<SessionSnapshot> {
        positive("scale_y", scale)?;
        self.update(id, |s, _| {
            s.transform.scale_y = scale;
            Ok(())
        })
        .await
    }

    /// Degrees, counter-clockwise on screen.
    pub async fn set_rotation(&self, id: SessionId, degrees: f64) -> DiffResult<SessionSnapshot> {
        finite("rotation_degrees", degrees)?;
        self.update(id, |s, _| {
            s.transform.rotation_degrees = degrees;
            Ok(())
        })
        .await
    }

    /// Clamped into the configured thickness range.
    pub async fn set_thickness(&self, id: SessionId, thickness: u32) -> DiffResult<SessionSnapshot> {
        self.update(id, |s, d| {
            s.thickness = d.clamp_thickness(thickness);
            Ok(())
        })
        .await
    }

    pub async fn reset(&self, id: SessionId) -> DiffResult<SessionSnapshot> {
        self.update(id, |s, d| {
            s.reset(d);
            Ok(())
        })
        .await
    }

    /// Composite the current state.
    pub async fn render(&self, id: SessionId) -> DiffResult<RgbImage> {
        let shared = self.get(id).await?;
        let session = shared.lock().await;
        session.render(&self.defaults)
    }

    /// Render and write a PNG; the session itself is untouched.
    pub async fn save(&self, id: SessionId, path: &Path) -> DiffResult<()> {
        let image = self.render(id).await?;
        image
            .save(path)
            .map_err(|e| DiffError::image("save_session", e).with_context(path.display().to_string()))?;
        info!(%id, path = %path.display(), "session image saved");
        Ok(())
    }
}

fn finite(field: &str, value: f64) -> DiffResult<()> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(DiffError::validation(field, "must be finite", value.to_string()))
    }
}

fn positive(field: &str, value: f64) -> DiffResult<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(DiffError::validation(field, "must be a finite value > 0", value.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, Rgb};

    fn dot(w: u32, h: u32, x: u32, y: u32) -> RasterImage {
        let mut img = GrayImage::from_pixel(w, h, Luma([255]));
        img.put_pixel(x, y, Luma([0]));
        RasterImage::Gray(img)
    }

    #[tokio::test]
    async fn load_resizes_to_larger() {
        let store = SessionStore::default();
        let id = store.create().await;
        let snap = store
            .load(id, RasterImage::Gray(GrayImage::new(40, 20)), RasterImage::Gray(GrayImage::new(30, 50)))
            .await
            .unwrap();
        assert_eq!(snap.size, Some((40, 50)));
        assert_eq!(snap.state, SessionState::Loaded);
    }

    #[tokio::test]
    async fn render_before_load_is_a_state_error() {
        let store = SessionStore::default();
        let id = store.create().await;
        assert_eq!(store.render(id).await.unwrap_err().category(), "state");
    }

    #[tokio::test]
    async fn offset_moves_upper_layer() {
        let store = SessionStore::default();
        let id = store.create().await;
        store.load(id, dot(30, 30, 10, 10), dot(30, 30, 5, 10)).await.unwrap();
        let before = store.render(id).await.unwrap();
        assert_eq!(before.get_pixel(10, 10).0, [255, 0, 0]);
        assert_eq!(before.get_pixel(5, 10).0, [0, 255, 0]);

        store.set_offset(id, 5.0, 0.0).await.unwrap();
        let after = store.render(id).await.unwrap();
        assert_eq!(after.get_pixel(10, 10).0, [0, 0, 255]);
        assert_eq!(*after.get_pixel(5, 10), Rgb([0, 0, 0]));
    }

    #[tokio::test]
    async fn setters_are_independent_and_reset_restores_defaults() {
        let store = SessionStore::default();
        let id = store.create().await;
        store.set_rotation(id, 12.0).await.unwrap();
        store.set_scale_x(id, 1.5).await.unwrap();
        let snap = store.set_opacity(id, 0.4).await.unwrap();
        assert_eq!(snap.transform.rotation_degrees, 12.0);
        assert_eq!(snap.transform.scale_x, 1.5);
        assert_eq!(snap.transform.scale_y, 1.0);
        assert_eq!(snap.opacity, 0.4);

        let again = store.set_opacity(id, 0.4).await.unwrap();
        assert_eq!(again, snap);

        let reset = store.reset(id).await.unwrap();
        assert!(reset.transform.is_identity());
        assert_eq!(reset.opacity, 1.0);
        assert_eq!(reset.thickness, 1);
    }

    #[tokio::test]
    async fn thickness_scales_with_upper_layer() {
        let mut upper = GrayImage::from_pixel(40, 40, Luma([255]));
        for y in 0..40 {
            upper.put_pixel(20, y, Luma([0]));
        }
        let store = SessionStore::default();
        let id = store.create().await;
        store
            .load(id, RasterImage::Gray(GrayImage::from_pixel(40, 40, Luma([255]))), RasterImage::Gray(upper))
            .await
            .unwrap();
        store.set_thickness(id, 3).await.unwrap();
        store.set_scale_x(id, 2.0).await.unwrap();
        let out = store.render(id).await.unwrap();
        let wide = (0..40).filter(|&x| out.get_pixel(x, 20).0[1] > 128).count();
        assert!((5..=7).contains(&wide), "stroke width {wide}");
    }

    #[tokio::test]
    async fn opacity_truncates_upper_signal() {
        let mut upper = GrayImage::from_pixel(10, 10, Luma([255]));
        upper.put_pixel(4, 4, Luma([0]));
        let store = SessionStore::default();
        let id = store.create().await;
        store
            .load(id, RasterImage::Gray(GrayImage::from_pixel(10, 10, Luma([255]))), RasterImage::Gray(upper))
            .await
            .unwrap();
        store.set_opacity(id, 0.5).await.unwrap();
        let out = store.render(id).await.unwrap();
        assert_eq!(out.get_pixel(4, 4).0, [0, 127, 0]);
    }

    #[tokio::test]
    async fn invalid_values_are_rejected_or_clamped() {
        let store = SessionStore::default();
        let id = store.create().await;
        assert!(store.set_opacity(id, 1.2).await.is_err());
        assert!(store.set_scale(id, 0.0).await.is_err());
        assert!(store.set_rotation(id, f64::NAN).await.is_err());
        assert_eq!(store.set_thickness(id, 99).await.unwrap().thickness, 10);
        assert_eq!(store.set_thickness(id, 0).await.unwrap().thickness, 1);
    }

    #[tokio::test]
    async fn unknown_and_closed_sessions_fail() {
        let store = SessionStore::default();
        let id = store.create().await;
        assert!(store.close(id).await);
        assert!(!store.close(id).await);
        assert!(store.snapshot(id).await.is_err());
        assert!(store.is_empty().await);
    }
}
