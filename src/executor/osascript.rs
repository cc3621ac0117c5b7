//! macOS desktop backend: one type that is both the [`Sensor`] and the [`Actuator`].
//!
//! Everything goes through `osascript` (AppleScript for keyboard/app control,
//! JXA with the CoreGraphics bridge for pointer events and accessibility scans)
//! and `screencapture` for screenshots.

use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use tokio::process::Command;

use crate::agent_engine::action::ScrollDirection;
use crate::config::ActuatorConfig;
use crate::errors::{DeskPilotError, DeskPilotResult};
use crate::executor::primitive::{
    Actuator, MouseButton, PrimitiveAction, PrimitiveResult, PrimitiveTarget,
};
use crate::executor::text_input::{escape_applescript, parse_key_combo, type_text_script};
use crate::perception::traits::{ScanContext, Sensor};
use crate::perception::types::{Bounds, ElementDescriptor, Screenshot};

const INTERACTIVE_ROLES: &[&str] = &[
    "AXButton",
    "AXCheckBox",
    "AXRadioButton",
    "AXPopUpButton",
    "AXMenuButton",
    "AXMenuItem",
    "AXTextField",
    "AXTextArea",
    "AXSearchField",
    "AXComboBox",
    "AXLink",
    "AXTab",
    "AXSlider",
    "AXCell",
    "AXStaticText",
];

const SCAN_JXA: &str = r#"
const se = Application('System Events');
const target = __TARGET__;
const max = __MAX__;
const roles = __ROLES__;
const procs = target ? se.processes.whose({ name: target }) : se.processes.whose({ frontmost: true });
const out = [];
function walk(el, depth) {
  if (out.length >= max || depth > 12) return;
  let kids;
  try { kids = el.uiElements(); } catch (e) { return; }
  for (const k of kids) {
    if (out.length >= max) return;
    let role = '', name = '', pos = null, size = null, focused = false;
    try { role = k.role(); } catch (e) {}
    try { name = k.name() || k.description() || k.value() || ''; } catch (e) {}
    try { pos = k.position(); size = k.size(); } catch (e) {}
    try { focused = !!k.focused(); } catch (e) {}
    if (roles.indexOf(role) >= 0) {
      out.push({ role: role, name: String(name), x: pos ? pos[0] : null, y: pos ? pos[1] : null,
                 w: size ? size[0] : null, h: size ? size[1] : null, focused: focused });
    }
    walk(k, depth + 1);
  }
}
if (procs.length > 0) {
  try { walk(procs[0].windows[0], 0); } catch (e) {}
}
JSON.stringify(out);
"#;

#[derive(Debug, Deserialize)]
struct RawElement {
    role: String,
    #[serde(default)]
    name: String,
    x: Option<f64>,
    y: Option<f64>,
    w: Option<f64>,
    h: Option<f64>,
    #[serde(default)]
    focused: bool,
}

impl RawElement {
    fn into_descriptor(self, index: usize) -> ElementDescriptor {
        let bounds = match (self.x, self.y, self.w, self.h) {
            (Some(x), Some(y), Some(width), Some(height)) => Some(Bounds {
                x,
                y,
                width,
                height,
            }),
            _ => None,
        };
        ElementDescriptor {
            clickable: self.role != "AXStaticText",
            role: self.role,
            name: self.name.trim().to_string(),
            selector: format!("ax:{index}"),
            bounds,
            focused: self.focused,
        }
    }
}

/// Parses the JSON emitted by the scan script into descriptors with `ax:<n>` selectors.
pub fn parse_scan_output(stdout: &str) -> DeskPilotResult<Vec<ElementDescriptor>> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    let raw: Vec<RawElement> = serde_json::from_str(trimmed)
        .map_err(|e| DeskPilotError::Perception(format!("unreadable scan output: {e}")))?;
    Ok(raw
        .into_iter()
        .enumerate()
        .map(|(i, r)| r.into_descriptor(i))
        .collect())
}

pub struct MacDesktop {
    cfg: ActuatorConfig,
}

impl MacDesktop {
    pub fn new(cfg: ActuatorConfig) -> Self {
        Self { cfg }
    }

    async fn osascript(&self, args: &[&str]) -> DeskPilotResult<String> {
        let output = Command::new(&self.cfg.osascript_path)
            .args(args)
            .output()
            .await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DeskPilotError::Executor(format!(
                "osascript failed ({}): {}",
                output.status,
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn applescript(&self, script: &str) -> DeskPilotResult<String> {
        self.osascript(&["-e", script]).await
    }

    async fn jxa(&self, script: &str) -> DeskPilotResult<String> {
        self.osascript(&["-l", "JavaScript", "-e", script]).await
    }

    async fn mouse(&self, x: i32, y: i32, button: MouseButton, count: u8) -> DeskPilotResult<()> {
        let (down, up, btn) = match button {
            MouseButton::Left => (1, 2, 0),
            MouseButton::Right => (3, 4, 1),
            MouseButton::Middle => (25, 26, 2),
        };
        let script = format!(
            "ObjC.import('CoreGraphics');\n\
             const p = $.CGPointMake({x}, {y});\n\
             $.CGEventPost($.kCGHIDEventTap, $.CGEventCreateMouseEvent(null, 5, p, 0));\n\
             for (let i = 1; i <= {count}; i++) {{\n\
               const d = $.CGEventCreateMouseEvent(null, {down}, p, {btn});\n\
               $.CGEventSetIntegerValueField(d, $.kCGMouseEventClickState, i);\n\
               $.CGEventPost($.kCGHIDEventTap, d);\n\
               const u = $.CGEventCreateMouseEvent(null, {up}, p, {btn});\n\
               $.CGEventSetIntegerValueField(u, $.kCGMouseEventClickState, i);\n\
               $.CGEventPost($.kCGHIDEventTap, u);\n\
             }}"
        );
        self.jxa(&script).await.map(|_| ())
    }

    async fn move_to(&self, x: i32, y: i32) -> DeskPilotResult<()> {
        let script = format!(
            "ObjC.import('CoreGraphics');\n\
             $.CGEventPost($.kCGHIDEventTap, $.CGEventCreateMouseEvent(null, 5, $.CGPointMake({x}, {y}), 0));"
        );
        self.jxa(&script).await.map(|_| ())
    }

    async fn drag(&self, from: (i32, i32), to: (i32, i32), duration_ms: u64) -> DeskPilotResult<()> {
        let steps = (duration_ms / 16).clamp(2, 120);
        let script = format!(
            "ObjC.import('CoreGraphics');\n\
             const post = (t, x, y) => $.CGEventPost($.kCGHIDEventTap, $.CGEventCreateMouseEvent(null, t, $.CGPointMake(x, y), 0));\n\
             post(5, {fx}, {fy});\n\
             post(1, {fx}, {fy});\n\
             for (let i = 1; i <= {steps}; i++) {{\n\
               post(6, {fx} + ({tx} - {fx}) * i / {steps}, {fy} + ({ty} - {fy}) * i / {steps});\n\
               delay({pause});\n\
             }}\n\
             post(2, {tx}, {ty});",
            fx = from.0,
            fy = from.1,
            tx = to.0,
            ty = to.1,
            pause = duration_ms as f64 / 1000.0 / steps as f64,
        );
        self.jxa(&script).await.map(|_| ())
    }

    async fn wheel(&self, delta_x: i32, delta_y: i32) -> DeskPilotResult<()> {
        let script = format!(
            "ObjC.import('CoreGraphics');\n\
             $.CGEventPost($.kCGHIDEventTap, $.CGEventCreateScrollWheelEvent(null, 1, 2, {delta_y}, {delta_x}));"
        );
        self.jxa(&script).await.map(|_| ())
    }

    /// Clicks an element by accessibility name when no coordinates are known.
    async fn click_by_name(&self, name: &str) -> DeskPilotResult<()> {
        let script = format!(
            "tell application \"System Events\"\n\
               tell (first process whose frontmost is true)\n\
                 click (first UI element of entire contents of window 1 whose name is \"{}\")\n\
               end tell\n\
             end tell",
            escape_applescript(name)
        );
        self.applescript(&script).await.map(|_| ())
    }

    async fn run(&self, action: &PrimitiveAction) -> DeskPilotResult<String> {
        match action {
            PrimitiveAction::Click {
                target,
                button,
                count,
            } => {
                let verb = match (button, count) {
                    (MouseButton::Left, 2) => "double-clicked",
                    (MouseButton::Right, _) => "right-clicked",
                    (MouseButton::Middle, _) => "middle-clicked",
                    _ => "clicked",
                };
                match target {
                    PrimitiveTarget::Point { x, y }
                    | PrimitiveTarget::Element {
                        point: Some((x, y)),
                        ..
                    } => {
                        self.mouse(*x, *y, *button, *count).await?;
                        Ok(format!("{verb} at ({x},{y})"))
                    }
                    PrimitiveTarget::Element { name, .. } if !name.is_empty() => {
                        self.click_by_name(name).await?;
                        Ok(format!("{verb} \"{name}\""))
                    }
                    PrimitiveTarget::Selector { selector }
                    | PrimitiveTarget::Element { selector, .. } => {
                        self.click_by_name(selector).await?;
                        Ok(format!("{verb} \"{selector}\""))
                    }
                }
            }
            PrimitiveAction::Hover { target } => match target {
                PrimitiveTarget::Point { x, y }
                | PrimitiveTarget::Element {
                    point: Some((x, y)),
                    ..
                } => {
                    self.move_to(*x, *y).await?;
                    Ok(format!("hovered at ({x},{y})"))
                }
                _ => Err(DeskPilotError::Executor(
                    "hover needs coordinates; the element has no bounds".into(),
                )),
            },
            PrimitiveAction::Drag {
                from,
                to,
                duration_ms,
            } => {
                self.drag(*from, *to, *duration_ms).await?;
                Ok(format!("dragged ({},{}) -> ({},{})", from.0, from.1, to.0, to.1))
            }
            PrimitiveAction::Scroll { direction, amount } => {
                let lines = *amount as i32 * 5;
                let (dx, dy) = match direction {
                    ScrollDirection::Up => (0, lines),
                    ScrollDirection::Down => (0, -lines),
                    ScrollDirection::Left => (lines, 0),
                    ScrollDirection::Right => (-lines, 0),
                };
                self.wheel(dx, dy).await?;
                Ok(format!("scrolled {}", direction.as_str()))
            }
            PrimitiveAction::ScrollAt {
                x,
                y,
                delta_x,
                delta_y,
            } => {
                self.move_to(*x, *y).await?;
                self.wheel(*delta_x, *delta_y).await?;
                Ok(format!("scrolled at ({x},{y})"))
            }
            PrimitiveAction::TypeText { text } => {
                self.applescript(&type_text_script(text)).await?;
                Ok("typed".into())
            }
            PrimitiveAction::KeyCombo { combo } => {
                let parsed = parse_key_combo(combo)?;
                self.applescript(&parsed.to_applescript()).await?;
                Ok("pressed key".into())
            }
            PrimitiveAction::RunScript { script } => {
                let out = self.applescript(script).await?;
                Ok(if out.is_empty() {
                    "script ran".into()
                } else {
                    format!("script output: {out}")
                })
            }
            PrimitiveAction::OpenUrl { url } => {
                self.applescript(&format!("open location \"{}\"", escape_applescript(url)))
                    .await?;
                Ok(format!("opened {url}"))
            }
            PrimitiveAction::OpenApp { app_name } => {
                self.applescript(&format!(
                    "tell application \"{}\" to activate",
                    escape_applescript(app_name)
                ))
                .await?;
                Ok(format!("activated {app_name}"))
            }
        }
    }
}

#[async_trait]
impl Actuator for MacDesktop {
    async fn perform(&self, action: &PrimitiveAction) -> PrimitiveResult {
        match self.run(action).await {
            Ok(message) => PrimitiveResult::ok(message),
            Err(e) => {
                tracing::debug!(op = action.name(), "primitive failed: {e}");
                PrimitiveResult::failure(e.to_string())
            }
        }
    }
}

#[async_trait]
impl Sensor for MacDesktop {
    async fn scan(&self, ctx: &ScanContext) -> DeskPilotResult<Vec<ElementDescriptor>> {
        let target = match &ctx.target_app {
            Some(app) => serde_json::to_string(app)?,
            None => "null".to_string(),
        };
        let max = if ctx.max_elements == 0 {
            self.cfg.max_elements
        } else {
            ctx.max_elements
        };
        let script = SCAN_JXA
            .replace("__TARGET__", &target)
            .replace("__MAX__", &max.to_string())
            .replace("__ROLES__", &serde_json::to_string(INTERACTIVE_ROLES)?);
        let stdout = self.jxa(&script).await?;
        parse_scan_output(&stdout)
    }

    async fn screenshot(&self) -> DeskPilotResult<Option<Screenshot>> {
        let path = std::env::temp_dir().join(format!("deskpilot_{}.png", uuid::Uuid::new_v4()));
        let status = Command::new(&self.cfg.screencapture_path)
            .arg("-x")
            .arg("-t")
            .arg("png")
            .arg(&path)
            .status()
            .await?;
        if !status.success() {
            return Err(DeskPilotError::Perception(format!("screencapture failed ({status})")));
        }
        let bytes = tokio::fs::read(&path).await?;
        let _ = tokio::fs::remove_file(&path).await;
        if bytes.is_empty() {
            return Ok(None);
        }
        Ok(Some(Screenshot::png(
            base64::engine::general_purpose::STANDARD.encode(bytes),
        )))
    }

    async fn screen_state(&self) -> DeskPilotResult<Option<String>> {
        let script = "tell application \"System Events\"\n\
                        set p to first process whose frontmost is true\n\
                        set appName to name of p\n\
                        set winName to \"\"\n\
                        try\n\
                          set winName to name of front window of p\n\
                        end try\n\
                      end tell\n\
                      return appName & \" | \" & winName";
        let out = self.applescript(script).await?;
        let Some((app, window)) = out.split_once(" | ") else {
            return Ok(None);
        };
        Ok(Some(if window.trim().is_empty() {
            format!("Front app: {app}")
        } else {
            format!("Front app: {app}, window \"{}\"", window.trim())
        }))
    }

    async fn focused_app(&self) -> DeskPilotResult<Option<String>> {
        let out = self
            .applescript("tell application \"System Events\" to get name of first process whose frontmost is true")
            .await?;
        Ok((!out.is_empty()).then_some(out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_output_gets_indexed_selectors() {
        let out = r#"[
            {"role":"AXButton","name":" 7 ","x":10,"y":20,"w":40,"h":30,"focused":false},
            {"role":"AXStaticText","name":"0","x":null,"y":null,"w":null,"h":null}
        ]"#;
        let els = parse_scan_output(out).unwrap();
        assert_eq!(els.len(), 2);
        assert_eq!(els[0].selector, "ax:0");
        assert_eq!(els[0].name, "7");
        assert_eq!(els[0].bounds.unwrap().center(), (30, 35));
        assert!(els[0].clickable);
        assert_eq!(els[1].selector, "ax:1");
        assert!(els[1].bounds.is_none());
        assert!(!els[1].clickable);
    }

    #[test]
    fn empty_or_broken_scan_output() {
        assert!(parse_scan_output("  ").unwrap().is_empty());
        assert!(matches!(
            parse_scan_output("execution error"),
            Err(DeskPilotError::Perception(_))
        ));
    }

    #[tokio::test]
    async fn missing_binary_is_a_failed_result_not_a_panic() {
        let desk = MacDesktop::new(ActuatorConfig {
            osascript_path: "/nonexistent/osascript".into(),
            ..ActuatorConfig::default()
        });
        let r = desk
            .perform(&PrimitiveAction::OpenApp { app_name: "Calculator".into() })
            .await;
        assert!(!r.success);
        assert!(desk.scan(&ScanContext::default()).await.is_err());
    }
}
