//! Flip-book presenter
//!
//! Tracks the current page of a fully rendered magazine and lays pages out
//! as spreads: the cover alone, then facing pairs, and a trailing unpaired
//! page alone as the back cover. Navigation is clamped to the document and
//! starts a page-turn animation with an optional sound.

use std::sync::Arc;
use std::time::Duration;

/// Smallest zoom factor.
pub const MIN_ZOOM: f32 = 0.5;

/// Largest zoom factor.
pub const MAX_ZOOM: f32 = 3.0;

/// Zoom change per zoom-in/zoom-out step.
pub const ZOOM_STEP: f32 = 0.25;

/// Presenter tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct FlipBookConfig {
    /// Duration of one page-turn animation
    pub flipping_time: Duration,

    /// Minimum horizontal drag, in pixels, recognized as a swipe
    pub swipe_distance: f32,

    /// Show page 0 alone as a cover
    pub show_cover: bool,

    /// Play the page-turn sound on navigation
    pub sound_enabled: bool,
}

impl Default for FlipBookConfig {
    fn default() -> Self {
        Self {
            flipping_time: Duration::from_millis(1000),
            swipe_distance: 30.0,
            show_cover: true,
            sound_enabled: true,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SoundError {
    #[error("sound playback failed: {0}")]
    Playback(String),
}

/// Page-turn sound output.
pub trait SoundPlayer: Send + Sync {
    fn play_page_turn(&self) -> Result<(), SoundError>;
}

/// Sound player that plays nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct Silent;

impl SoundPlayer for Silent {
    fn play_page_turn(&self) -> Result<(), SoundError> {
        Ok(())
    }
}

/// The one or two pages visible at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Spread {
    pub left: u32,
    pub right: Option<u32>,
}

impl Spread {
    pub fn is_single(&self) -> bool {
        self.right.is_none()
    }

    pub fn contains(&self, page: u32) -> bool {
        self.left == page || self.right == Some(page)
    }

    /// Page indices in reading order.
    pub fn pages(&self) -> impl Iterator<Item = u32> {
        std::iter::once(self.left).chain(self.right)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlipDirection {
    Forward,
    Backward,
}

/// Outcome of a navigation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Navigation {
    Moved { from: u32, to: u32 },
    Unchanged,
}

impl Navigation {
    pub fn moved(&self) -> bool {
        matches!(self, Navigation::Moved { .. })
    }
}

/// An in-flight page turn.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlipAnimation {
    pub direction: FlipDirection,
    pub from: u32,
    pub to: u32,
    elapsed: Duration,
    duration: Duration,
}

impl FlipAnimation {
    /// Completion in `0.0..=1.0`.
    pub fn progress(&self) -> f32 {
        if self.duration.is_zero() {
            return 1.0;
        }
        (self.elapsed.as_secs_f32() / self.duration.as_secs_f32()).min(1.0)
    }

    pub fn is_finished(&self) -> bool {
        self.elapsed >= self.duration
    }
}

/// Keys the presenter reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Left,
    Right,
    Up,
    Down,
    Home,
    End,
}

/// A pointer drag, in pixels from press to release.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Drag {
    pub dx: f32,
    pub dy: f32,
}

/// Paged view over a rendered magazine.
pub struct FlipBook {
    page_count: u32,
    current_page: u32,
    zoom: f32,
    config: FlipBookConfig,
    animation: Option<FlipAnimation>,
    sound: Arc<dyn SoundPlayer>,
}

impl FlipBook {
    /// Presenter at page 0 with no sound output.
    pub fn new(page_count: u32, config: FlipBookConfig) -> Self {
        Self::with_sound(page_count, config, Arc::new(Silent))
    }

    pub fn with_sound(page_count: u32, config: FlipBookConfig, sound: Arc<dyn SoundPlayer>) -> Self {
        Self { page_count, current_page: 0, zoom: 1.0, config, animation: None, sound }
    }

    pub fn page_count(&self) -> u32 {
        self.page_count
    }

    pub fn current_page(&self) -> u32 {
        self.current_page
    }

    pub fn config(&self) -> &FlipBookConfig {
        &self.config
    }

    fn last_page(&self) -> u32 {
        self.page_count.saturating_sub(1)
    }

    /// Spread containing `page`.
    pub fn spread_for(&self, page: u32) -> Spread {
        let page = page.min(self.last_page());
        let left = if self.config.show_cover {
            if page == 0 {
                return Spread { left: 0, right: None };
            }
            if page % 2 == 1 { page } else { page - 1 }
        } else {
            page - page % 2
        };
        let right = left + 1;
        Spread { left, right: (right < self.page_count).then_some(right) }
    }

    /// Spread containing the current page.
    pub fn spread(&self) -> Spread {
        self.spread_for(self.current_page)
    }

    /// Every spread of the document, in order.
    pub fn spreads(&self) -> Vec<Spread> {
        let mut spreads = Vec::new();
        let mut page = 0;
        while page < self.page_count {
            let spread = self.spread_for(page);
            page = spread.right.unwrap_or(spread.left) + 1;
            spreads.push(spread);
        }
        spreads
    }

    pub fn can_go_back(&self) -> bool {
        self.current_page > 0
    }

    pub fn can_go_forward(&self) -> bool {
        self.current_page < self.last_page()
    }

    pub fn next_page(&mut self) -> Navigation {
        self.go_to(self.current_page.saturating_add(1))
    }

    pub fn previous_page(&mut self) -> Navigation {
        self.go_to(self.current_page.saturating_sub(1))
    }

    /// Move to `page`, clamped into the document.
    pub fn jump_to(&mut self, page: u32) -> Navigation {
        self.go_to(page)
    }

    fn go_to(&mut self, page: u32) -> Navigation {
        let target = page.min(self.last_page());
        let from = self.current_page;
        if target == from {
            return Navigation::Unchanged;
        }

        self.current_page = target;
        let direction = if target > from { FlipDirection::Forward } else { FlipDirection::Backward };
        self.animation = Some(FlipAnimation {
            direction,
            from,
            to: target,
            elapsed: Duration::ZERO,
            duration: self.config.flipping_time,
        });
        self.play_sound();

        log::debug!("page {} -> {}", from + 1, target + 1);
        Navigation::Moved { from, to: target }
    }

    fn play_sound(&self) {
        if !self.config.sound_enabled {
            return;
        }
        if let Err(err) = self.sound.play_page_turn() {
            log::debug!("page-turn sound skipped: {err}");
        }
    }

    pub fn set_sound_enabled(&mut self, enabled: bool) {
        self.config.sound_enabled = enabled;
    }

    pub fn handle_key(&mut self, key: Key) -> Navigation {
        match key {
            Key::Left | Key::Up => self.previous_page(),
            Key::Right | Key::Down => self.next_page(),
            Key::Home => self.jump_to(0),
            Key::End => self.jump_to(self.last_page()),
        }
    }

    /// Treat a mostly horizontal drag longer than the swipe distance as a
    /// page turn: leftwards goes forward, rightwards goes back.
    pub fn handle_drag(&mut self, drag: Drag) -> Navigation {
        if drag.dx.abs() < self.config.swipe_distance || drag.dx.abs() < drag.dy.abs() {
            return Navigation::Unchanged;
        }
        if drag.dx < 0.0 {
            self.next_page()
        } else {
            self.previous_page()
        }
    }

    /// Advance the page-turn animation. Returns whether it is still running.
    pub fn tick(&mut self, elapsed: Duration) -> bool {
        if let Some(animation) = self.animation.as_mut() {
            animation.elapsed += elapsed;
            if animation.is_finished() {
                self.animation = None;
            }
        }
        self.animation.is_some()
    }

    pub fn is_animating(&self) -> bool {
        self.animation.is_some()
    }

    pub fn animation(&self) -> Option<&FlipAnimation> {
        self.animation.as_ref()
    }

    pub fn zoom(&self) -> f32 {
        self.zoom
    }

    pub fn set_zoom(&mut self, zoom: f32) -> f32 {
        self.zoom = if zoom.is_finite() { zoom.clamp(MIN_ZOOM, MAX_ZOOM) } else { 1.0 };
        self.zoom
    }

    pub fn zoom_in(&mut self) -> f32 {
        self.set_zoom(self.zoom + ZOOM_STEP)
    }

    pub fn zoom_out(&mut self) -> f32 {
        self.set_zoom(self.zoom - ZOOM_STEP)
    }

    pub fn reset_zoom(&mut self) -> f32 {
        self.set_zoom(1.0)
    }

    /// "Page X of N"
    pub fn page_label(&self) -> String {
        format!("Page {} of {}", self.current_page + 1, self.page_count)
    }
}

impl std::fmt::Debug for FlipBook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlipBook")
            .field("page_count", &self.page_count)
            .field("current_page", &self.current_page)
            .field("zoom", &self.zoom)
            .field("animation", &self.animation)
            .finish_non_exhaustive()
    }
}
