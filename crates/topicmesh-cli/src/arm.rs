//! Two-link planar arm: the state the demo publisher sends and the forward
//! kinematics the monitor renders.

use serde::{Deserialize, Serialize};

/// Topic carrying [`ArmState`] messages.
pub const ARM_TOPIC: &str = "arm_state";

/// Simulation time advanced per published state.
pub const TIME_STEP: f64 = 0.05;

pub const LINK1_LENGTH: f64 = 100.0;
pub const LINK2_LENGTH: f64 = 80.0;

/// Joint angles in radians.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ArmState {
    pub joint1_angle: f64,
    pub joint2_angle: f64,
}

impl ArmState {
    /// The demo trajectory at simulation time `t`.
    pub fn at(t: f64) -> Self {
        Self {
            joint1_angle: 0.5 * t.sin(),
            joint2_angle: 0.3 * t.cos(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

/// Joint positions of the arm, y pointing up.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArmPose {
    pub base: Point,
    pub elbow: Point,
    pub tip: Point,
}

/// Forward kinematics for a two-link arm anchored at `base`. `joint2_angle`
/// is relative to the first link.
pub fn forward_kinematics(base: Point, state: ArmState, link1: f64, link2: f64) -> ArmPose {
    let theta1 = state.joint1_angle;
    let theta12 = theta1 + state.joint2_angle;
    let elbow = Point {
        x: base.x + link1 * theta1.cos(),
        y: base.y + link1 * theta1.sin(),
    };
    let tip = Point {
        x: elbow.x + link2 * theta12.cos(),
        y: elbow.y + link2 * theta12.sin(),
    };
    ArmPose { base, elbow, tip }
}

/// One status line for the monitor.
pub fn describe(state: ArmState, pose: ArmPose) -> String {
    format!(
        "joint1 {:>7.2}\u{b0}  joint2 {:>7.2}\u{b0}  elbow ({:>7.1}, {:>7.1})  tip ({:>7.1}, {:>7.1})",
        state.joint1_angle.to_degrees(),
        state.joint2_angle.to_degrees(),
        pose.elbow.x,
        pose.elbow.y,
        pose.tip.x,
        pose.tip.y,
    )
}
