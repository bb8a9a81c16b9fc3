use crate::detect::{Label, TeamSide};

use super::tracker::TrackedObject;

/// Decides a track's team. Called by the tracker after every update; the
/// result may change over time without touching the track's identity.
pub trait TeamAssigner: Send {
    fn assign(&self, track: &TrackedObject) -> Option<TeamSide>;
}

/// Players are assigned by which half of the pitch they have spent their
/// trajectory in. Referees are neutral; ball and goalposts have no team.
#[derive(Clone, Copy, Debug)]
pub struct PitchHalfAssigner {
    pub home_on_left: bool,
}

impl PitchHalfAssigner {
    pub fn new(home_on_left: bool) -> Self {
        Self { home_on_left }
    }
}

impl Default for PitchHalfAssigner {
    fn default() -> Self {
        Self::new(true)
    }
}

impl TeamAssigner for PitchHalfAssigner {
    fn assign(&self, track: &TrackedObject) -> Option<TeamSide> {
        match track.label() {
            Label::Referee => Some(TeamSide::Neutral),
            Label::Ball | Label::Goalpost => None,
            Label::Player => {
                let mean_x = track.mean_position().x;
                let on_left = mean_x < 0.5;
                Some(if on_left == self.home_on_left {
                    TeamSide::Home
                } else {
                    TeamSide::Away
                })
            }
        }
    }
}
