use serde::{Deserialize, Serialize};

/// Screen-space rectangle in logical points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Bounds {
    pub fn center(&self) -> (i32, i32) {
        (
            (self.x + self.width / 2.0).round() as i32,
            (self.y + self.height / 2.0).round() as i32,
        )
    }

    pub fn area(&self) -> f64 {
        self.width.max(0.0) * self.height.max(0.0)
    }
}

/// One interactable UI element as reported by a scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementDescriptor {
    /// Accessibility role, e.g. "AXButton" or "button".
    pub role: String,
    /// Display name (title, description or value, whichever the sensor found).
    pub name: String,
    /// Stable handle the actuator understands; planners must echo it verbatim.
    pub selector: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounds: Option<Bounds>,
    #[serde(default = "default_clickable")]
    pub clickable: bool,
    #[serde(default)]
    pub focused: bool,
}

fn default_clickable() -> bool {
    true
}

impl ElementDescriptor {
    /// Role without the "AX" prefix, lower-cased.
    pub fn normalized_role(&self) -> String {
        self.role
            .strip_prefix("AX")
            .unwrap_or(&self.role)
            .to_lowercase()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Screenshot {
    pub mime_type: String,
    pub base64: String,
}

impl Screenshot {
    pub fn png(base64: String) -> Self {
        Self {
            mime_type: "image/png".into(),
            base64,
        }
    }

    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.base64)
    }
}

/// Point-in-time snapshot fed to the planner. Built fresh every iteration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Observation {
    pub elements: Vec<ElementDescriptor>,
    pub screenshot: Option<Screenshot>,
    pub screen_state: Option<String>,
}

impl Observation {
    pub fn find_element(&self, selector: &str) -> Option<&ElementDescriptor> {
        find_element(&self.elements, selector)
    }
}

/// Resolves a planner-supplied selector: exact selector first, then case-insensitive name.
pub fn find_element<'a>(
    elements: &'a [ElementDescriptor],
    selector: &str,
) -> Option<&'a ElementDescriptor> {
    let wanted = selector.trim();
    elements
        .iter()
        .find(|e| e.selector == wanted)
        .or_else(|| {
            let lower = wanted.to_lowercase();
            elements
                .iter()
                .find(|e| !e.name.is_empty() && e.name.to_lowercase() == lower)
        })
}

/// Order-sensitive fingerprint of a scan, used to detect UI changes.
pub fn fingerprint(elements: &[ElementDescriptor]) -> u64 {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let mut hasher = DefaultHasher::new();
    elements.len().hash(&mut hasher);
    for e in elements {
        e.role.hash(&mut hasher);
        e.name.hash(&mut hasher);
        e.selector.hash(&mut hasher);
        e.focused.hash(&mut hasher);
        if let Some(b) = e.bounds {
            (b.x as i64, b.y as i64, b.width as i64, b.height as i64).hash(&mut hasher);
        }
    }
    hasher.finish()
}
