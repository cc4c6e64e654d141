//! Keeps two independently scrollable viewports visually coherent.
//!
//! Pure geometry: a fixed-interval tick inspects both viewports, elects the
//! one that moved as the driver, and projects its offset onto the follower.
//! When pane heights differ the follower can be configured proportional per
//! axis, mapping the driver's fractional offset onto the follower's own
//! scrollable range. Content semantics never enter here.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

/// Scroll geometry of one pane: current offset plus the visible and total
/// extents, in rendered-row/column units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub position: (f64, f64),
    pub viewport_extent: (f64, f64),
    pub layout_extent: (f64, f64),
}

impl Viewport {
    pub fn new(layout_extent: (f64, f64), viewport_extent: (f64, f64)) -> Self {
        Viewport {
            position: (0.0, 0.0),
            viewport_extent,
            layout_extent,
        }
    }

    /// Maximum scroll offset per axis; zero when content fits the viewport.
    pub fn scrollable(&self) -> (f64, f64) {
        (
            (self.layout_extent.0 - self.viewport_extent.0).max(0.0),
            (self.layout_extent.1 - self.viewport_extent.1).max(0.0),
        )
    }

    /// Current offset clamped into the scrollable range.
    pub fn clamped_position(&self) -> (f64, f64) {
        let range = self.scrollable();
        (
            self.position.0.clamp(0.0, range.0),
            self.position.1.clamp(0.0, range.1),
        )
    }
}

/// A viewport shared between the embedder (which scrolls it) and the
/// synchronizer (which projects onto it).
pub type SharedViewport = Arc<Mutex<Viewport>>;

pub fn shared(viewport: Viewport) -> SharedViewport {
    Arc::new(Mutex::new(viewport))
}

fn read(view: &SharedViewport) -> Viewport {
    match view.lock() {
        Ok(guard) => *guard,
        Err(poisoned) => *poisoned.into_inner(),
    }
}

fn write_position(view: &SharedViewport, position: (f64, f64)) {
    let mut guard = match view.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    guard.position = position;
}

/// Per-pane synchronization state.
pub struct Scroller {
    view: SharedViewport,
    last_position: Option<(f64, f64)>,
    target: (f64, f64),
    proportional_x: bool,
    proportional_y: bool,
}

impl Scroller {
    pub fn new(view: SharedViewport, proportional_x: bool, proportional_y: bool) -> Self {
        let snapshot = read(&view);
        Scroller {
            last_position: Some(snapshot.position),
            target: snapshot.clamped_position(),
            view,
            proportional_x,
            proportional_y,
        }
    }

    fn project_axis(proportional: bool, driver_pos: f64, driver_range: f64, own_range: f64) -> f64 {
        if proportional {
            let denominator = if driver_range <= 0.0 { 1.0 } else { driver_range };
            let fraction = (driver_pos / denominator).min(1.0);
            (fraction * own_range).ceil().clamp(0.0, own_range)
        } else {
            driver_pos.clamp(0.0, own_range)
        }
    }

    /// Recomputes this follower's target from the driver's offset and moves
    /// the viewport there.
    fn sync_to(&mut self, driver: Viewport) {
        let driver_range = driver.scrollable();
        let own_range = read(&self.view).scrollable();
        self.target = (
            Self::project_axis(
                self.proportional_x,
                driver.position.0,
                driver_range.0,
                own_range.0,
            ),
            Self::project_axis(
                self.proportional_y,
                driver.position.1,
                driver_range.1,
                own_range.1,
            ),
        );
        write_position(&self.view, self.target);
    }

    /// True if the viewport has not moved since the previous call; records
    /// the new position otherwise.
    fn is_stopped(&mut self) -> bool {
        let position = read(&self.view).position;
        if self.last_position == Some(position) {
            return true;
        }
        self.last_position = Some(position);
        false
    }

    /// True if the viewport sits at the last pushed target.
    fn is_synced(&self) -> bool {
        read(&self.view).clamped_position() == self.target
    }

    /// Adopts the current position as the target.
    fn reset(&mut self) {
        self.target = read(&self.view).clamped_position();
    }

    fn snapshot(&self) -> Viewport {
        read(&self.view)
    }
}

/// The tick-driven state machine over a synchronized pair (or more).
///
/// At most one scroller drives at a time; the rest follow its projection
/// until the driver stops and every follower has settled on its target.
pub struct SyncState {
    scrollers: Vec<Scroller>,
    active: Option<usize>,
    following: Vec<usize>,
}

impl SyncState {
    pub fn new(scrollers: Vec<Scroller>) -> Self {
        SyncState {
            scrollers,
            active: None,
            following: Vec::new(),
        }
    }

    pub fn is_idle(&self) -> bool {
        self.active.is_none()
    }

    fn push_to_followers(&mut self, driver: usize) {
        let snapshot = self.scrollers[driver].snapshot();
        let following = self.following.clone();
        for index in following {
            self.scrollers[index].sync_to(snapshot);
        }
    }

    /// One synchronization step.
    pub fn tick(&mut self) {
        match self.active {
            None => {
                for index in 0..self.scrollers.len() {
                    if self.scrollers[index].is_stopped() {
                        continue;
                    }
                    self.active = Some(index);
                    self.following = (0..self.scrollers.len())
                        .filter(|i| *i != index)
                        .collect();
                    self.push_to_followers(index);
                    break;
                }
            }
            Some(driver) => {
                let settled = self
                    .following
                    .iter()
                    .all(|&i| self.scrollers[i].is_synced());
                if settled && self.scrollers[driver].is_stopped() {
                    // One final projection corrects any rounding before the
                    // pair goes idle.
                    self.scrollers[driver].reset();
                    self.push_to_followers(driver);
                    self.following.clear();
                    self.active = None;
                } else {
                    self.push_to_followers(driver);
                }
            }
        }
    }
}

/// Owns the repeating tick task for one diff session's pane pair.
pub struct ScrollSync {
    enabled: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl ScrollSync {
    /// Spawns the tick task. The synchronizer is tied to one session and is
    /// not shared across sessions.
    pub fn start(scrollers: Vec<Scroller>, interval: Duration) -> Self {
        let state = Arc::new(Mutex::new(SyncState::new(scrollers)));
        let enabled = Arc::new(AtomicBool::new(true));

        let tick_enabled = Arc::clone(&enabled);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                // Cancellation is checked before every projection; a tick is
                // self-contained so nothing needs unwinding.
                if !tick_enabled.load(Ordering::SeqCst) {
                    break;
                }
                let mut guard = match state.lock() {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
                guard.tick();
            }
        });

        ScrollSync {
            enabled,
            task: Some(task),
        }
    }

    pub fn is_running(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Stops scheduling ticks. Safe to call more than once.
    pub fn destroy(&mut self) {
        if self.enabled.swap(false, Ordering::SeqCst) {
            debug!("scroll synchronizer stopped");
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(layout_a: f64, layout_b: f64, visible: f64) -> (SharedViewport, SharedViewport) {
        (
            shared(Viewport::new((500.0, layout_a), (500.0, visible))),
            shared(Viewport::new((500.0, layout_b), (500.0, visible))),
        )
    }

    fn set_y(view: &SharedViewport, y: f64) {
        let mut guard = view.lock().unwrap();
        guard.position.1 = y;
    }

    fn y(view: &SharedViewport) -> f64 {
        view.lock().unwrap().position.1
    }

    #[test]
    fn proportional_projection_scales_to_follower_range() {
        // Pane A: 200 rows, 50 visible (scrollable 150); pane B: 100 rows.
        let (a, b) = pair(200.0, 100.0, 50.0);
        let mut state = SyncState::new(vec![
            Scroller::new(Arc::clone(&a), false, true),
            Scroller::new(Arc::clone(&b), false, true),
        ]);

        state.tick();
        assert!(state.is_idle(), "no movement, no driver");

        // Scroll A to 50% of its scrollable range.
        set_y(&a, 75.0);
        state.tick();
        assert!(!state.is_idle());
        assert_eq!(y(&b), 25.0, "B lands at 50% of its own scrollable range");

        // A stopped and B settled: one more tick returns the pair to idle.
        state.tick();
        assert!(state.is_idle());
        assert_eq!(y(&b), 25.0);
    }

    #[test]
    fn raw_projection_clamps_to_follower_range() {
        let (a, b) = pair(200.0, 100.0, 50.0);
        let mut state = SyncState::new(vec![
            Scroller::new(Arc::clone(&a), false, false),
            Scroller::new(Arc::clone(&b), false, false),
        ]);

        set_y(&a, 120.0);
        state.tick();
        assert_eq!(y(&b), 50.0, "raw offset clamped to B's scrollable max");
    }

    #[test]
    fn follower_movement_elects_it_as_driver() {
        let (a, b) = pair(100.0, 100.0, 50.0);
        let mut state = SyncState::new(vec![
            Scroller::new(Arc::clone(&a), false, false),
            Scroller::new(Arc::clone(&b), false, false),
        ]);

        set_y(&b, 30.0);
        state.tick();
        assert_eq!(y(&a), 30.0, "second scroller can drive the first");
        state.tick();
        assert!(state.is_idle());

        // The pair re-activates for a new gesture after going idle.
        set_y(&a, 10.0);
        state.tick();
        assert_eq!(y(&b), 10.0);
    }

    #[tokio::test]
    async fn tick_task_follows_and_destroy_is_idempotent() {
        let (a, b) = pair(200.0, 200.0, 50.0);
        let scrollers = vec![
            Scroller::new(Arc::clone(&a), false, false),
            Scroller::new(Arc::clone(&b), false, false),
        ];
        let mut sync = ScrollSync::start(scrollers, Duration::from_millis(1));

        set_y(&a, 40.0);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(y(&b), 40.0);

        sync.destroy();
        assert!(!sync.is_running());

        // No further ticks: moving A no longer drives B.
        set_y(&a, 90.0);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(y(&b), 40.0);

        sync.destroy();
        assert!(!sync.is_running());
    }
}
