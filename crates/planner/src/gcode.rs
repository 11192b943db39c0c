//! A forgiving G-code reader.
//!
//! Slicer and CAM output is full of things a tank can't do (arcs, homing,
//! heater commands...). Rather than rejecting a whole file because of one
//! such line, we turn anything we don't understand into a [`Command::Comment`]
//! and keep going.
//!
//! All of the modal bookkeeping happens here: every [`Command::Move`] that
//! comes out has its X and Y filled in and carries the feedrate that is in
//! effect, so later stages never need to look back at earlier lines.

use serde::{Deserialize, Serialize};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MotionMode {
    /// G0
    Rapid,
    /// G1
    Linear,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Mode {
    /// G90
    AbsolutePositioning,
    /// G91
    RelativePositioning,
    /// G20
    Inches,
    /// G21
    Millimeters,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ToolKind {
    SpindleOn,
    SpindleOff,
    SpindleSpeed,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Units {
    Millimeters,
    Inches,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Command {
    Comment {
        text: String,
    },
    ModeSwitch {
        kind: Mode,
    },
    Move {
        kind: MotionMode,
        x: Option<f64>,
        y: Option<f64>,
        z: Option<f64>,
        feedrate: Option<f64>,
    },
    ToolControl {
        kind: ToolKind,
        speed: Option<f64>,
    },
}

/// Values that carry over from one line to the next.
#[derive(Clone, Debug)]
pub struct ModalState {
    pub motion_mode: MotionMode,
    pub feedrate: Option<f64>,
    pub units: Units,
    pub absolute: bool,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub spindle_speed: Option<f64>,
}

impl Default for ModalState {
    fn default() -> Self {
        ModalState {
            motion_mode: MotionMode::Rapid,
            feedrate: None,
            units: Units::Millimeters,
            absolute: true,
            x: 0.0,
            y: 0.0,
            z: 0.0,
            spindle_speed: None,
        }
    }
}

/// The words found on a single line.
#[derive(Default, Debug)]
struct Words {
    g: Vec<i64>,
    m: Vec<i64>,
    x: Option<f64>,
    y: Option<f64>,
    z: Option<f64>,
    f: Option<f64>,
    s: Option<f64>,
}

impl Words {
    fn has_axes(&self) -> bool {
        self.x.is_some() || self.y.is_some() || self.z.is_some() || self.f.is_some()
    }

    fn is_empty(&self) -> bool {
        self.g.is_empty() && self.m.is_empty() && !self.has_axes() && self.s.is_none()
    }
}

/// Removes `( ... )` and `; ...` comments and any `*checksum`.
fn strip_comments(line: &str) -> String {
    let mut ret = String::with_capacity(line.len());
    let mut depth = 0usize;
    for ch in line.chars() {
        match ch {
            ';' | '*' if depth == 0 => break,
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            _ if depth == 0 => ret.push(ch),
            _ => {}
        }
    }
    ret
}

fn take_number(chars: &mut std::iter::Peekable<std::str::Chars>) -> Option<f64> {
    while chars.peek().is_some_and(|c| c.is_whitespace()) {
        chars.next();
    }
    let mut s = String::new();
    if let Some(&c) = chars.peek() {
        if c == '-' || c == '+' {
            s.push(c);
            chars.next();
        }
    }
    while let Some(&c) = chars.peek() {
        if c.is_ascii_digit() || c == '.' {
            s.push(c);
            chars.next();
        } else {
            break;
        }
    }
    s.parse().ok()
}

/// Splits a comment-free line into words. Returns `None` if anything on the
/// line is not something we know how to handle.
fn parse_words(code: &str) -> Option<Words> {
    let mut words = Words::default();
    let mut chars = code.chars().peekable();

    while let Some(letter) = chars.next() {
        if letter.is_whitespace() {
            continue;
        }
        let value = take_number(&mut chars)?;
        match letter.to_ascii_uppercase() {
            // G and M numbers are compared as integers, so G1.0 is G1.
            'G' => words.g.push(value.trunc() as i64),
            'M' => words.m.push(value.trunc() as i64),
            'X' => words.x = Some(value),
            'Y' => words.y = Some(value),
            'Z' => words.z = Some(value),
            'F' => words.f = Some(value),
            'S' => words.s = Some(value),
            // Line numbers.
            'N' => {}
            _ => return None,
        }
    }
    Some(words)
}

/// Turns G-code text into a flat list of commands, in source order.
///
/// This never fails: unrecognized lines become comments.
pub fn interpret(text: &str) -> Vec<Command> {
    let mut interp = Interpreter::default();
    let mut ret = Vec::new();
    for line in text.lines() {
        interp.line(line, &mut ret);
    }
    ret
}

#[derive(Default)]
pub struct Interpreter {
    modal: ModalState,
    warned_inches: bool,
    warned_relative: bool,
}

impl Interpreter {
    pub fn modal(&self) -> &ModalState {
        &self.modal
    }

    /// Interprets a single line, appending whatever it produced to `out`.
    pub fn line(&mut self, raw: &str, out: &mut Vec<Command>) {
        let line = raw.trim();
        if line.is_empty() {
            return;
        }
        if line.starts_with('(') || line.starts_with(';') {
            out.push(Command::Comment {
                text: line.to_owned(),
            });
            return;
        }

        let Some(words) = parse_words(&strip_comments(line)).filter(|w| self.supported(w)) else {
            log::debug!("passing through unsupported line {line:?}");
            out.push(Command::Comment {
                text: line.to_owned(),
            });
            return;
        };

        for &g in &words.g {
            match g {
                0 => self.modal.motion_mode = MotionMode::Rapid,
                1 => self.modal.motion_mode = MotionMode::Linear,
                20 => self.switch_mode(Mode::Inches, out),
                21 => self.switch_mode(Mode::Millimeters, out),
                90 => self.switch_mode(Mode::AbsolutePositioning, out),
                91 => self.switch_mode(Mode::RelativePositioning, out),
                _ => {}
            }
        }

        if let Some(s) = words.s {
            self.modal.spindle_speed = Some(s);
        }

        let spindle_on = words.m.contains(&3);
        if words.m.contains(&5) {
            out.push(Command::ToolControl {
                kind: ToolKind::SpindleOff,
                speed: None,
            });
        }
        if spindle_on {
            out.push(Command::ToolControl {
                kind: ToolKind::SpindleOn,
                speed: self.modal.spindle_speed,
            });
        } else if let Some(s) = words.s {
            out.push(Command::ToolControl {
                kind: ToolKind::SpindleSpeed,
                speed: Some(s),
            });
        }

        if words.has_axes() {
            out.push(self.movement(&words));
        }
    }

    fn supported(&self, words: &Words) -> bool {
        !words.is_empty()
            && words.g.iter().all(|g| matches!(g, 0 | 1 | 20 | 21 | 90 | 91))
            && words.m.iter().all(|m| matches!(m, 3 | 5))
    }

    fn switch_mode(&mut self, kind: Mode, out: &mut Vec<Command>) {
        match kind {
            Mode::Inches => {
                self.modal.units = Units::Inches;
                if !self.warned_inches {
                    log::warn!("G20 (inches) seen; coordinates will still be treated as millimeters");
                    self.warned_inches = true;
                }
            }
            Mode::Millimeters => self.modal.units = Units::Millimeters,
            Mode::AbsolutePositioning => self.modal.absolute = true,
            Mode::RelativePositioning => {
                self.modal.absolute = false;
                if !self.warned_relative {
                    log::warn!("G91 (relative) seen; coordinates will still be treated as absolute");
                    self.warned_relative = true;
                }
            }
        }
        out.push(Command::ModeSwitch { kind });
    }

    fn movement(&mut self, words: &Words) -> Command {
        if let Some(x) = words.x {
            self.modal.x = x;
        }
        if let Some(y) = words.y {
            self.modal.y = y;
        }
        if let Some(z) = words.z {
            self.modal.z = z;
        }
        if let Some(f) = words.f {
            self.modal.feedrate = Some(f);
        }

        Command::Move {
            kind: self.modal.motion_mode,
            x: Some(self.modal.x),
            y: Some(self.modal.y),
            z: words.z,
            feedrate: self.modal.feedrate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mv(kind: MotionMode, x: f64, y: f64, z: Option<f64>, feedrate: Option<f64>) -> Command {
        Command::Move {
            kind,
            x: Some(x),
            y: Some(y),
            z,
            feedrate,
        }
    }

    #[test]
    fn sticky_motion_mode() {
        let cmds = interpret("G1 X10 F500\nX20\nY5\n");
        assert_eq!(
            cmds,
            vec![
                mv(MotionMode::Linear, 10.0, 0.0, None, Some(500.0)),
                mv(MotionMode::Linear, 20.0, 0.0, None, Some(500.0)),
                mv(MotionMode::Linear, 20.0, 5.0, None, Some(500.0)),
            ]
        );
    }

    #[test]
    fn default_motion_mode_is_rapid() {
        assert_eq!(
            interpret("X1 Y2"),
            vec![mv(MotionMode::Rapid, 1.0, 2.0, None, None)]
        );
    }

    #[test]
    fn comments_pass_through() {
        let cmds = interpret("; header\n(tool change)\n\nG0 X1 ; go right\n");
        assert_eq!(
            cmds,
            vec![
                Command::Comment {
                    text: "; header".to_owned()
                },
                Command::Comment {
                    text: "(tool change)".to_owned()
                },
                mv(MotionMode::Rapid, 1.0, 0.0, None, None),
            ]
        );
    }

    #[test]
    fn unsupported_lines_degrade_to_comments() {
        let cmds = interpret("G28\nM104 S200\nG2 X1 Y1 I1 J0\nT1\nG1 X\n%");
        assert_eq!(cmds.len(), 6);
        assert!(cmds.iter().all(|c| matches!(c, Command::Comment { .. })));
        assert_eq!(
            cmds[1],
            Command::Comment {
                text: "M104 S200".to_owned()
            }
        );
    }

    #[test]
    fn unsupported_s_word_does_not_change_held_speed() {
        let cmds = interpret("M104 S200\nM3");
        assert_eq!(
            cmds[1],
            Command::ToolControl {
                kind: ToolKind::SpindleOn,
                speed: None
            }
        );
    }

    #[test]
    fn number_formats() {
        let cmds = interpret("G1.0 X-1.5 Y.5\nG01X+2Y3Z-0.25F1200\nn10 g0 x4");
        assert_eq!(
            cmds,
            vec![
                mv(MotionMode::Linear, -1.5, 0.5, None, None),
                mv(MotionMode::Linear, 2.0, 3.0, Some(-0.25), Some(1200.0)),
                mv(MotionMode::Rapid, 4.0, 3.0, None, Some(1200.0)),
            ]
        );
    }

    #[test]
    fn z_only_when_written() {
        let cmds = interpret("G1 Z-1 F100\nG1 X5\n");
        assert_eq!(
            cmds,
            vec![
                mv(MotionMode::Linear, 0.0, 0.0, Some(-1.0), Some(100.0)),
                mv(MotionMode::Linear, 5.0, 0.0, None, Some(100.0)),
            ]
        );
    }

    #[test]
    fn modes_are_tracked() {
        let mut interp = Interpreter::default();
        let mut out = Vec::new();
        interp.line("G20 G91", &mut out);
        assert_eq!(
            out,
            vec![
                Command::ModeSwitch { kind: Mode::Inches },
                Command::ModeSwitch {
                    kind: Mode::RelativePositioning
                },
            ]
        );
        assert_eq!(interp.modal().units, Units::Inches);
        assert!(!interp.modal().absolute);

        interp.line("G21 G90", &mut out);
        assert_eq!(interp.modal().units, Units::Millimeters);
        assert!(interp.modal().absolute);
    }

    #[test]
    fn spindle() {
        let cmds = interpret("S1000\nM3\nM03 S2000\nS3000\nM5\nM05");
        let tool = |kind, speed| Command::ToolControl { kind, speed };
        assert_eq!(
            cmds,
            vec![
                tool(ToolKind::SpindleSpeed, Some(1000.0)),
                tool(ToolKind::SpindleOn, Some(1000.0)),
                tool(ToolKind::SpindleOn, Some(2000.0)),
                tool(ToolKind::SpindleSpeed, Some(3000.0)),
                tool(ToolKind::SpindleOff, None),
                tool(ToolKind::SpindleOff, None),
            ]
        );
    }

    #[test]
    fn speed_before_move_on_the_same_line() {
        let cmds = interpret("G1 X1 S500");
        assert_eq!(
            cmds,
            vec![
                Command::ToolControl {
                    kind: ToolKind::SpindleSpeed,
                    speed: Some(500.0)
                },
                mv(MotionMode::Linear, 1.0, 0.0, None, None),
            ]
        );
    }

    #[test]
    fn bare_motion_code_only_sets_mode() {
        let cmds = interpret("G1\nX3");
        assert_eq!(cmds, vec![mv(MotionMode::Linear, 3.0, 0.0, None, None)]);
    }

    #[test]
    fn inline_comment_in_the_middle() {
        let cmds = interpret("G1 (fast) X7");
        assert_eq!(cmds, vec![mv(MotionMode::Linear, 7.0, 0.0, None, None)]);
    }
}
