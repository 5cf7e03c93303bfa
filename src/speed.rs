/// Sliding-window smoothing of instantaneous sensor speed
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug)]
struct SpeedWindow {
    samples: VecDeque<f64>,
    smoothed: f64,
}

/// Shared between the notification monitor (writer) and the playback loop (reader)
#[derive(Debug)]
pub struct SpeedController {
    window_size: usize,
    window: Mutex<SpeedWindow>,
}

impl SpeedController {
    /// A window size of zero is treated as one
    pub fn new(window_size: usize) -> Self {
        let window_size = window_size.max(1);
        SpeedController {
            window_size,
            window: Mutex::new(SpeedWindow {
                samples: VecDeque::with_capacity(window_size),
                smoothed: 0.0,
            }),
        }
    }

    pub fn update_speed(&self, speed: f64) {
        let mut window = self.lock();
        if window.samples.len() == self.window_size {
            window.samples.pop_front();
        }
        window.samples.push_back(speed);
        window.smoothed = window.samples.iter().sum::<f64>() / window.samples.len() as f64;
    }

    /// Mean of the current window, 0 before any sample arrives
    pub fn current_smoothed_speed(&self) -> f64 {
        self.lock().smoothed
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    // Every update leaves the window consistent, so a poisoned lock is still usable
    fn lock(&self) -> MutexGuard<'_, SpeedWindow> {
        self.window.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
