//! Report bodies built from unit state, and their plain-text rendering.

use std::collections::BTreeMap;

use serde_json::{json, Value};
use thiserror::Error;

use crate::intelligence::Contact;
use crate::messages::Report;
use crate::resources::SimTime;
use crate::unit::Unit;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReportError {
    #[error("no comm template for '{0}'")]
    CommTemplateNotFound(String),
}

pub fn sitrep(unit: &Unit, now: SimTime) -> Report {
    let task = unit
        .staff
        .opord
        .as_ref()
        .and_then(|o| o.current_task())
        .map(|t| t.name());
    let at = unit.point();
    Report {
        from: unit.id,
        issued: now,
        contacts: Vec::new(),
        body: json!({
            "kind": "sitrep",
            "unit": unit.name,
            "side": unit.side,
            "time": now.to_string(),
            "x": at.x,
            "y": at.y,
            "stance": unit.stance().as_str(),
            "readiness": unit.readiness(),
            "strength": unit.strength(),
            "cargo": unit.cargo_level(),
            "morale": unit.morale(),
            "fatigue": unit.fatigue(),
            "suppression": unit.suppression(),
            "task": task.unwrap_or("none"),
            "engaged": !unit.ground_engagements.is_empty(),
        }),
    }
}

fn contact_rows(contacts: &[Contact]) -> Vec<Value> {
    contacts
        .iter()
        .map(|c| {
            let at = c.location.as_ref().map(|l| l.point());
            json!({
                "key": c.key,
                "status": c.status.as_str(),
                "rating": c.rating,
                "side": c.side().unwrap_or("unknown"),
                "x": at.map(|p| p.x),
                "y": at.map(|p| p.y),
            })
        })
        .collect()
}

/// Every active contact, as seen by `unit`.
pub fn intsum(unit: &Unit, now: SimTime) -> Report {
    let contacts: Vec<Contact> = unit
        .contacts
        .values()
        .filter(|c| c.is_active())
        .map(Contact::as_report)
        .collect();
    let direct = unit.contacts.values().filter(|c| c.is_direct()).count();
    Report {
        from: unit.id,
        issued: now,
        body: json!({
            "kind": "intsum",
            "unit": unit.name,
            "time": now.to_string(),
            "count": contacts.len(),
            "direct": direct,
            "contacts": contact_rows(&contacts),
        }),
        contacts,
    }
}

/// Fresh contacts being passed up the chain.
pub fn cntrep(unit: &Unit, contacts: Vec<Contact>, now: SimTime) -> Report {
    Report {
        from: unit.id,
        issued: now,
        body: json!({
            "kind": "cntrep",
            "unit": unit.name,
            "time": now.to_string(),
            "count": contacts.len(),
            "contacts": contact_rows(&contacts),
        }),
        contacts,
    }
}

/// Public-affairs summary: how the unit is holding up.
pub fn pasum(unit: &Unit, band: &str, now: SimTime) -> Report {
    Report {
        from: unit.id,
        issued: now,
        contacts: Vec::new(),
        body: json!({
            "kind": "pasum",
            "unit": unit.name,
            "side": unit.side,
            "time": now.to_string(),
            "band": band,
            "morale": unit.morale(),
            "fatigue": unit.fatigue(),
            "strength": unit.strength(),
            "engaged": !unit.ground_engagements.is_empty(),
        }),
    }
}

/// Turns a report body into bytes.
pub trait ReportFormatter {
    fn format(&self, body: &Value) -> Result<Vec<u8>, ReportError>;
}

/// Renders `{field}` placeholders from comm templates keyed by report kind.
/// Rows of a `contacts` array use the `contact` template.
#[derive(Debug, Clone)]
pub struct TextFormatter {
    templates: BTreeMap<String, String>,
}

impl Default for TextFormatter {
    fn default() -> Self {
        let mut templates = BTreeMap::new();
        templates.insert(
            "sitrep".to_string(),
            "SITREP {unit} ({side}) {time}: {stance} at {x},{y}; strength {strength}, \
             cargo {cargo}, readiness {readiness}h; task {task}"
                .to_string(),
        );
        templates.insert(
            "intsum".to_string(),
            "INTSUM {unit} {time}: {count} contacts, {direct} direct".to_string(),
        );
        templates.insert(
            "cntrep".to_string(),
            "CNTREP {unit} {time}: {count} new".to_string(),
        );
        templates.insert(
            "pasum".to_string(),
            "PASUM {unit} ({side}) {time}: morale {morale} ({band}), fatigue {fatigue}, \
             strength {strength}"
                .to_string(),
        );
        templates.insert(
            "contact".to_string(),
            "  {key} {status} rating {rating} side {side} at {x},{y}".to_string(),
        );
        Self { templates }
    }
}

impl TextFormatter {
    pub fn with_template(mut self, kind: impl Into<String>, template: impl Into<String>) -> Self {
        self.templates.insert(kind.into(), template.into());
        self
    }

    fn template(&self, kind: &str) -> Result<&str, ReportError> {
        self.templates
            .get(kind)
            .map(String::as_str)
            .ok_or_else(|| ReportError::CommTemplateNotFound(kind.to_string()))
    }
}

fn render_value(value: Option<&Value>) -> String {
    match value {
        None => "?".to_string(),
        Some(Value::Null) => "-".to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => match n.as_i64() {
            Some(i) => i.to_string(),
            None => {
                let v = (n.as_f64().unwrap_or(0.0) * 100.0).round() / 100.0;
                format!("{v}")
            }
        },
        Some(other) => other.to_string(),
    }
}

fn render(template: &str, body: &Value) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) => {
                out.push_str(&render_value(body.get(&after[..close])));
                rest = &after[close + 1..];
            }
            None => {
                out.push_str(&rest[open..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

impl ReportFormatter for TextFormatter {
    fn format(&self, body: &Value) -> Result<Vec<u8>, ReportError> {
        let kind = body.get("kind").and_then(Value::as_str).unwrap_or("");
        let mut text = render(self.template(kind)?, body);
        if let Some(rows) = body.get("contacts").and_then(Value::as_array) {
            if !rows.is_empty() {
                let row_template = self.template("contact")?;
                for row in rows {
                    text.push('\n');
                    text.push_str(&render(row_template, row));
                }
            }
        }
        text.push('\n');
        Ok(text.into_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intelligence::{ContactField, ContactStatus};
    use crate::position::PositionDescriptor;
    use crate::unit::{Stance, UnitId};
    use sim_runtime::Point;

    fn team() -> Unit {
        Unit::new(UnitId(3), "A TEAM", "blue")
            .with_personnel("rifleman", 4)
            .at(Point::new(12.5, 7.0), 0.1)
            .with_stance(Stance::HastyDefense)
    }

    fn text(body: &Value) -> String {
        let bytes = TextFormatter::default().format(body).unwrap();
        String::from_utf8(bytes).unwrap().trim_end().to_string()
    }

    #[test]
    fn sitrep_renders_through_its_template() {
        let report = sitrep(&team(), SimTime(3_600 * 26 + 600));
        insta::assert_snapshot!(text(&report.body), @"SITREP A TEAM (blue) D+1 02:10: hasty_defense at 12.5,7; strength 1, cargo 0, readiness 0h; task none");
    }

    #[test]
    fn pasum_carries_the_morale_band() {
        let report = pasum(&team(), "steady", SimTime(600));
        assert!(report.contacts.is_empty());
        insta::assert_snapshot!(text(&report.body), @"PASUM A TEAM (blue) D+0 00:10: morale 1 (steady), fatigue 0, strength 1");
    }

    #[test]
    fn intsum_lists_active_contacts() {
        let mut unit = team();
        let mut contact = Contact::new(UnitId(9), "red:scouts");
        contact.status = ContactStatus::Direct;
        contact.rating = 2;
        contact.location = Some(PositionDescriptor::at(Point::new(13.0, 8.25), 0.1));
        contact
            .fields
            .insert(ContactField::Side, serde_json::json!("red"));
        unit.contacts.insert(contact.key.clone(), contact);
        let report = intsum(&unit, SimTime(600));
        assert_eq!(report.contacts.len(), 1);
        assert_eq!(report.contacts[0].status, ContactStatus::Reported);
        insta::assert_snapshot!(text(&report.body), @r"
        INTSUM A TEAM D+0 00:10: 1 contacts, 1 direct
          red:scouts reported rating 2 side red at 13,8.25
        ");
    }

    #[test]
    fn missing_templates_are_reported() {
        let formatter = TextFormatter {
            templates: BTreeMap::new(),
        };
        let err = formatter.format(&json!({ "kind": "sitrep" })).unwrap_err();
        assert_eq!(err, ReportError::CommTemplateNotFound("sitrep".into()));
    }
}
