//! Local audible feedback on presence transitions.

use std::path::PathBuf;
use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, warn};

/// Side-effect hook run on presence transitions. Must not block.
pub trait Feedback: Send + Sync {
    /// A beacon became present.
    fn on_appear(&self, identifier: &str);

    /// A beacon left.
    fn on_disappear(&self, identifier: &str);
}

/// Does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct SilentFeedback;

impl Feedback for SilentFeedback {
    fn on_appear(&self, _identifier: &str) {}

    fn on_disappear(&self, _identifier: &str) {}
}

/// Plays a wav file with `aplay` without waiting for it to finish.
#[derive(Debug, Clone)]
pub struct SoundFeedback {
    player: String,
    appear: Option<PathBuf>,
    disappear: Option<PathBuf>,
}

impl SoundFeedback {
    /// Plays `appear` and `disappear` through `aplay`.
    #[must_use]
    pub fn new(appear: Option<PathBuf>, disappear: Option<PathBuf>) -> Self {
        Self {
            player: "aplay".to_string(),
            appear,
            disappear,
        }
    }

    /// Uses a different player binary.
    #[must_use]
    pub fn with_player(mut self, player: impl Into<String>) -> Self {
        self.player = player.into();
        self
    }

    fn play(&self, sound: Option<&PathBuf>, identifier: &str) {
        let Some(sound) = sound else {
            return;
        };
        debug!(identifier, sound = %sound.display(), "Playing feedback sound");

        let spawned = Command::new(&self.player)
            .arg(sound)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();
        if let Err(e) = spawned {
            warn!(player = %self.player, error = %e, "Could not play feedback sound");
        }
    }
}

impl Feedback for SoundFeedback {
    fn on_appear(&self, identifier: &str) {
        self.play(self.appear.as_ref(), identifier);
    }

    fn on_disappear(&self, identifier: &str) {
        self.play(self.disappear.as_ref(), identifier);
    }
}
