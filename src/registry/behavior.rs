//! Cursor behaviors and per-tick stepping
//!
//! Each behavior is a variant holding exactly the parameters it needs.
//! `step` advances a cursor's position as a pure function of its behavior
//! state, the elapsed time, and the reference pointer position, except for
//! [`Behavior::Script`], whose position is driven externally by its bridge.

use serde::{Deserialize, Serialize};

/// A 2D position or offset.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec2 {
    /// Horizontal coordinate
    pub x: f64,
    /// Vertical coordinate
    pub y: f64,
}

impl Vec2 {
    /// Construct from components.
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// RGB color, wire format `#RRGGBB`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Color {
    /// Red channel
    pub r: u8,
    /// Green channel
    pub g: u8,
    /// Blue channel
    pub b: u8,
}

impl Color {
    /// Pure white, the fallback for unparseable color strings.
    pub const WHITE: Color = Color {
        r: 255,
        g: 255,
        b: 255,
    };

    /// Parse a 7-character `#RRGGBB` string. Anything else yields white.
    pub fn parse(s: &str) -> Color {
        let bytes = s.as_bytes();
        if bytes.len() == 7 && bytes[0] == b'#' {
            let hex = |i: usize| u8::from_str_radix(&s[i..i + 2], 16).ok();
            if let (Some(r), Some(g), Some(b)) = (hex(1), hex(3), hex(5)) {
                return Color { r, g, b };
            }
        }
        Color::WHITE
    }

    /// Format as `#RRGGBB`.
    pub fn to_hex(self) -> String {
        format!("#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
    }
}

/// Position-update rule for a cursor.
#[derive(Debug, Clone, PartialEq)]
pub enum Behavior {
    /// Track the reference pointer at a fixed offset.
    Mirror {
        /// Horizontal offset from the reference pointer
        offset_x: f64,
        /// Vertical offset from the reference pointer
        offset_y: f64,
    },
    /// Pin to the cursor's target point.
    Static,
    /// Circle the reference pointer.
    Orbit {
        /// Orbit radius in pixels
        radius: f64,
        /// Angular speed in radians per second
        speed: f64,
        /// Current angle, advanced each tick
        angle: f64,
    },
    /// Exponentially approach the reference pointer.
    FollowLag {
        /// Time constant in milliseconds; larger lags converge slower
        lag_ms: f64,
        /// Set on the first tick, which snaps to the reference
        initialized: bool,
    },
    /// Externally driven by a script bridge; the tick pass leaves it alone.
    Script {
        /// Path of the script launched for this cursor
        script_path: String,
    },
}

impl Behavior {
    /// Wire name used in commands, events, and the state file.
    pub fn name(&self) -> &'static str {
        match self {
            Behavior::Mirror { .. } => "mirror",
            Behavior::Static => "static",
            Behavior::Orbit { .. } => "orbit",
            Behavior::FollowLag { .. } => "follow",
            Behavior::Script { .. } => "script",
        }
    }
}

/// A single simulated cursor entity.
#[derive(Debug, Clone, PartialEq)]
pub struct Cursor {
    /// Unique positive id; 0 on insert means "allocate"
    pub id: u64,
    /// Position-update rule
    pub behavior: Behavior,
    /// Current render position, derived each tick
    pub pos: Vec2,
    /// Authoritative point for Static behavior and drag targets
    pub target: Vec2,
    /// Render color
    pub color: Color,
    /// Render size in pixels, valid range (2, 400)
    pub size: u32,
}

impl Default for Cursor {
    fn default() -> Self {
        Cursor {
            id: 0,
            behavior: Behavior::Mirror {
                offset_x: 0.0,
                offset_y: 0.0,
            },
            pos: Vec2::default(),
            target: Vec2::default(),
            color: Color { r: 0, g: 200, b: 255 },
            size: 12,
        }
    }
}

/// Advance one cursor by `dt` seconds against the reference pointer.
pub fn step(cursor: &mut Cursor, dt: f64, reference: Vec2) {
    match &mut cursor.behavior {
        Behavior::Mirror { offset_x, offset_y } => {
            cursor.pos = Vec2::new(reference.x + *offset_x, reference.y + *offset_y);
        }
        Behavior::Static => {
            cursor.pos = cursor.target;
        }
        Behavior::Orbit {
            radius,
            speed,
            angle,
        } => {
            *angle += *speed * dt;
            cursor.pos = Vec2::new(
                reference.x + angle.cos() * *radius,
                reference.y + angle.sin() * *radius,
            );
        }
        Behavior::FollowLag {
            lag_ms,
            initialized,
        } => {
            if !*initialized {
                cursor.pos = reference;
                *initialized = true;
            } else {
                // Alpha saturates at 1 for large dt: instant snap, never overshoot.
                let alpha = (dt * 1000.0 / lag_ms.max(1.0)).clamp(0.0, 1.0);
                cursor.pos.x += (reference.x - cursor.pos.x) * alpha;
                cursor.pos.y += (reference.y - cursor.pos.y) * alpha;
            }
        }
        Behavior::Script { .. } => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn color_parses_rrggbb() {
        let c = Color::parse("#1A2b3C");
        assert_eq!(c, Color { r: 0x1A, g: 0x2B, b: 0x3C });
        assert_eq!(c.to_hex(), "#1A2B3C");
    }

    #[test]
    fn color_falls_back_to_white() {
        assert_eq!(Color::parse("red"), Color::WHITE);
        assert_eq!(Color::parse("#12345"), Color::WHITE);
        assert_eq!(Color::parse("#GGGGGG"), Color::WHITE);
        assert_eq!(Color::parse(""), Color::WHITE);
    }

    #[test]
    fn mirror_tracks_reference_with_offset() {
        let mut c = Cursor {
            behavior: Behavior::Mirror {
                offset_x: 10.0,
                offset_y: -5.0,
            },
            ..Default::default()
        };
        step(&mut c, 0.016, Vec2::new(100.0, 200.0));
        assert_eq!(c.pos, Vec2::new(110.0, 195.0));
    }

    #[test]
    fn static_pins_to_target() {
        let mut c = Cursor {
            behavior: Behavior::Static,
            target: Vec2::new(50.0, 60.0),
            ..Default::default()
        };
        step(&mut c, 1.0, Vec2::new(999.0, 999.0));
        assert_eq!(c.pos, Vec2::new(50.0, 60.0));
    }

    #[test]
    fn orbit_half_turn_lands_opposite() {
        let mut c = Cursor {
            behavior: Behavior::Orbit {
                radius: 100.0,
                speed: 1.0,
                angle: 0.0,
            },
            ..Default::default()
        };
        // Advance a total of pi seconds in uneven steps; angle accumulates
        // continuously, no discontinuity at wrap.
        let steps = [0.5, 1.0, 0.7, std::f64::consts::PI - 2.2];
        for dt in steps {
            step(&mut c, dt, Vec2::default());
        }
        assert!((c.pos.x - (-100.0)).abs() < 1e-9, "x = {}", c.pos.x);
        assert!(c.pos.y.abs() < 1e-9, "y = {}", c.pos.y);
    }

    #[test]
    fn follow_lag_first_tick_snaps() {
        let mut c = Cursor {
            behavior: Behavior::FollowLag {
                lag_ms: 500.0,
                initialized: false,
            },
            ..Default::default()
        };
        step(&mut c, 0.016, Vec2::new(30.0, 40.0));
        assert_eq!(c.pos, Vec2::new(30.0, 40.0));
    }

    #[test]
    fn follow_lag_converges_monotonically_without_overshoot() {
        let target = Vec2::new(100.0, 0.0);
        let mut c = Cursor {
            behavior: Behavior::FollowLag {
                lag_ms: 500.0,
                initialized: true,
            },
            pos: Vec2::default(),
            ..Default::default()
        };
        let mut last = (target.x - c.pos.x).abs();
        for _ in 0..10 {
            step(&mut c, 0.05, target);
            let residual = (target.x - c.pos.x).abs();
            assert!(residual < last, "residual must strictly decrease");
            assert!(c.pos.x <= target.x, "must never overshoot");
            last = residual;
        }
    }

    #[test]
    fn follow_lag_huge_dt_snaps_instead_of_overshooting() {
        let target = Vec2::new(100.0, 100.0);
        let mut c = Cursor {
            behavior: Behavior::FollowLag {
                lag_ms: 10.0,
                initialized: true,
            },
            ..Default::default()
        };
        step(&mut c, 5.0, target);
        assert_eq!(c.pos, target);
    }

    #[test]
    fn script_position_untouched_by_tick() {
        let mut c = Cursor {
            behavior: Behavior::Script {
                script_path: "orbiter.sh".into(),
            },
            pos: Vec2::new(7.0, 8.0),
            ..Default::default()
        };
        step(&mut c, 0.016, Vec2::new(500.0, 500.0));
        assert_eq!(c.pos, Vec2::new(7.0, 8.0));
    }
}
