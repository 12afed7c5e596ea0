//! Scenario documents: template library, units, initial orders and
//! `execute` blocks.
//!
//! Any object carrying a `template` key is first replaced by the named
//! template from the library, then its sibling keys are laid over it.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sim_runtime::{GeoTranslator, SupplyPackage};
use thiserror::Error;

use crate::agent::Sop;
use crate::infrastructure::{Infrastructure, LocationError};
use crate::oob::{Oob, OobError};
use crate::opord::OrderSpec;
use crate::resources::IdAllocator;
use crate::terrain::{MapError, TerrainClass, TerrainMap};
use crate::unit::{C3Model, MovementModel, Models, Stance, Unit, UnitId, UnitKind};

/// Nested templates deeper than this are treated as a cycle.
const MAX_TEMPLATE_DEPTH: usize = 16;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("template '{0}' not found")]
    TemplateNotFound(String),
    #[error("template '{0}' refers back to itself")]
    TemplateCycle(String),
    #[error("invalid scenario document: {0}")]
    InvalidDocument(#[from] serde_json::Error),
    #[error("unit '{unit}' is missing '{field}'")]
    MissingField { unit: String, field: &'static str },
    #[error("unknown model kind '{0}'")]
    UnknownKind(String),
    #[error("duplicate unit name '{0}'")]
    DuplicateUnit(String),
    #[error("unit '{unit}' refers to unknown unit '{name}'")]
    UnknownReference { unit: String, name: String },
    #[error("failed to read {path:?}: {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Location(#[from] LocationError),
    #[error(transparent)]
    Map(#[from] MapError),
    #[error(transparent)]
    Oob(#[from] OobError),
}

/// The five capability models a unit carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    C3,
    Combat,
    Intelligence,
    Logistics,
    Movement,
}

impl ModelKind {
    pub const ALL: [ModelKind; 5] = [
        ModelKind::C3,
        ModelKind::Combat,
        ModelKind::Intelligence,
        ModelKind::Logistics,
        ModelKind::Movement,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ModelKind::C3 => "c3",
            ModelKind::Combat => "combat",
            ModelKind::Intelligence => "intelligence",
            ModelKind::Logistics => "logistics",
            ModelKind::Movement => "movement",
        }
    }

    pub fn parse(text: &str) -> Result<Self, LoadError> {
        ModelKind::ALL
            .into_iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(text.trim()))
            .ok_or_else(|| LoadError::UnknownKind(text.to_string()))
    }
}

/// Built-in rectangle of one terrain class, for maps without a package.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InlineTerrain {
    pub width_km: f64,
    pub height_km: f64,
    #[serde(default = "default_km_per_px")]
    pub km_per_px: f64,
    #[serde(default = "default_class")]
    pub class: TerrainClass,
    #[serde(default)]
    pub reference: Option<InlineReference>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InlineReference {
    pub mgrs: String,
    pub xy: [f64; 2],
}

fn default_km_per_px() -> f64 {
    0.5
}

fn default_class() -> TerrainClass {
    TerrainClass::Unrestricted
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitialOrder {
    pub unit: String,
    #[serde(flatten)]
    pub order: OrderSpec,
}

/// A scripted call made after the scenario is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecuteBlock {
    pub method: String,
    #[serde(default)]
    pub args: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenarioDocument {
    pub name: String,
    /// Hour of day at D+0 00:00 scenario time.
    pub start_hour: Option<f64>,
    pub seed: Option<u64>,
    /// Map package folder, relative to the scenario folder.
    pub map: Option<String>,
    pub terrain: Option<InlineTerrain>,
    pub sides: BTreeMap<String, String>,
    pub weather: Vec<String>,
    pub templates: BTreeMap<String, Value>,
    pub units: Vec<Value>,
    pub orders: Vec<InitialOrder>,
    pub execute: Vec<ExecuteBlock>,
}

impl ScenarioDocument {
    pub fn from_json_str(json: &str) -> Result<Self, LoadError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file(path: &Path) -> Result<Self, LoadError> {
        let text = fs::read_to_string(path).map_err(|source| LoadError::ReadFailed {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    /// `node` with every `template` reference expanded.
    pub fn expand(&self, node: &Value) -> Result<Value, LoadError> {
        self.expand_at(node, 0)
    }

    fn expand_at(&self, node: &Value, depth: usize) -> Result<Value, LoadError> {
        match node {
            Value::Object(fields) => {
                let mut base = match fields.get("template").and_then(Value::as_str) {
                    Some(name) => {
                        if depth >= MAX_TEMPLATE_DEPTH {
                            return Err(LoadError::TemplateCycle(name.to_string()));
                        }
                        let template = self
                            .templates
                            .get(name)
                            .ok_or_else(|| LoadError::TemplateNotFound(name.to_string()))?;
                        match self.expand_at(template, depth + 1)? {
                            Value::Object(map) => map,
                            _ => Map::new(),
                        }
                    }
                    None => Map::new(),
                };
                for (key, value) in fields {
                    if key == "template" {
                        continue;
                    }
                    let value = self.expand_at(value, depth)?;
                    overlay(&mut base, key, value);
                }
                Ok(Value::Object(base))
            }
            Value::Array(items) => Ok(Value::Array(
                items
                    .iter()
                    .map(|item| self.expand_at(item, depth))
                    .collect::<Result<_, _>>()?,
            )),
            other => Ok(other.clone()),
        }
    }
}

/// Objects merge key by key; anything else replaces.
fn overlay(base: &mut Map<String, Value>, key: &str, value: Value) {
    let Value::Object(incoming) = value else {
        base.insert(key.to_string(), value);
        return;
    };
    if let Some(Value::Object(existing)) = base.get_mut(key) {
        for (k, v) in incoming {
            overlay(existing, &k, v);
        }
        return;
    }
    base.insert(key.to_string(), Value::Object(incoming));
}

/// A unit node after template expansion.
#[derive(Debug, Clone, Deserialize)]
struct UnitNode {
    name: Option<String>,
    side: Option<String>,
    location: Option<String>,
    #[serde(default)]
    echelon: String,
    #[serde(default)]
    kind: UnitKind,
    #[serde(default = "default_radius")]
    radius_km: f64,
    #[serde(default)]
    stance: Stance,
    #[serde(default)]
    personnel: BTreeMap<String, u32>,
    #[serde(default)]
    vehicles: BTreeMap<String, u32>,
    #[serde(default)]
    capacity: SupplyPackage,
    #[serde(default = "default_level")]
    supply_level: f64,
    #[serde(default)]
    sop: Sop,
    #[serde(default)]
    models: Map<String, Value>,
}

fn default_radius() -> f64 {
    0.25
}

fn default_level() -> f64 {
    1.0
}

/// Chain-of-command references, resolved once every unit exists.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UnitLinks {
    pub hq: Option<String>,
    pub opcon: Option<String>,
    pub css_unit: Option<String>,
}

/// Spatial context for resolving unit locations.
pub struct LoadContext<'a> {
    pub infrastructure: &'a Infrastructure,
    pub geo: &'a GeoTranslator,
}

/// Fill one model of `models` from `node`, after template expansion.
pub fn load_model(
    doc: &ScenarioDocument,
    node: &Value,
    kind: ModelKind,
    models: &mut Models,
) -> Result<(), LoadError> {
    let node = doc.expand(node)?;
    match kind {
        ModelKind::C3 => models.c3 = serde_json::from_value::<C3Model>(node)?,
        ModelKind::Combat => models.combat = serde_json::from_value(node)?,
        ModelKind::Intelligence => models.intelligence = serde_json::from_value(node)?,
        ModelKind::Logistics => models.logistics = serde_json::from_value(node)?,
        ModelKind::Movement => models.movement = serde_json::from_value::<MovementModel>(node)?,
    }
    Ok(())
}

/// Build a unit from a scenario node. Links to other units come back
/// unresolved.
pub fn load_unit(
    doc: &ScenarioDocument,
    node: &Value,
    id: UnitId,
    ctx: &LoadContext<'_>,
) -> Result<(Unit, UnitLinks), LoadError> {
    let expanded = doc.expand(node)?;
    let links = UnitLinks {
        hq: string_field(&expanded, "hq"),
        opcon: string_field(&expanded, "opcon"),
        css_unit: string_field(&expanded, "css_unit"),
    };
    let spec: UnitNode = serde_json::from_value(expanded)?;
    let name = spec.name.ok_or(LoadError::MissingField {
        unit: format!("#{}", id.0),
        field: "name",
    })?;
    let side = spec.side.ok_or_else(|| LoadError::MissingField {
        unit: name.clone(),
        field: "side",
    })?;
    let location = spec.location.ok_or_else(|| LoadError::MissingField {
        unit: name.clone(),
        field: "location",
    })?;
    let at = ctx.infrastructure.resolve_location(&location, ctx.geo)?;

    let mut unit = Unit::new(id, name, side)
        .at(at, spec.radius_km)
        .with_kind(spec.kind)
        .with_echelon(spec.echelon)
        .with_stance(spec.stance);
    for (template, count) in spec.personnel {
        unit = unit.with_personnel(template, count);
    }
    for (template, count) in spec.vehicles {
        unit = unit.with_vehicles(template, count);
    }
    unit = unit.with_supply(spec.capacity, spec.supply_level);

    for (key, model_node) in &spec.models {
        load_model(doc, model_node, ModelKind::parse(key)?, &mut unit.models)?;
    }
    if unit.kind == UnitKind::Css {
        unit.models.logistics.css = true;
    }
    unit.staff.sop = spec.sop;
    Ok((unit, links))
}

/// Load every unit of `doc` in document order, then wire up HQ, OPCON and
/// CSS references by name.
pub fn build_oob(
    doc: &ScenarioDocument,
    ctx: &LoadContext<'_>,
    ids: &mut IdAllocator,
    log_tail: usize,
) -> Result<Oob, LoadError> {
    let mut oob = Oob::default();
    let mut pending = Vec::with_capacity(doc.units.len());
    for node in &doc.units {
        let id = UnitId(ids.unit());
        let (mut unit, links) = load_unit(doc, node, id, ctx)?;
        if oob.find_by_name(&unit.name).is_some() {
            return Err(LoadError::DuplicateUnit(unit.name));
        }
        unit.log.set_tail_limit(log_tail);
        pending.push((id, unit.name.clone(), links));
        oob.insert(unit)?;
    }

    let lookup = |oob: &Oob, unit: &str, name: &str| {
        oob.id_by_name(name).map_err(|_| LoadError::UnknownReference {
            unit: unit.to_string(),
            name: name.to_string(),
        })
    };
    for (id, name, links) in pending {
        if let Some(hq) = &links.hq {
            let hq = lookup(&oob, &name, hq)?;
            oob.set_hq(id, Some(hq))?;
        }
        if let Some(opcon) = &links.opcon {
            let opcon = lookup(&oob, &name, opcon)?;
            oob.attach_opcon(id, Some(opcon))?;
        }
        if let Some(css) = &links.css_unit {
            let css = lookup(&oob, &name, css)?;
            if let Some(unit) = oob.get_mut(id) {
                unit.staff.sop.css_unit = Some(css);
            }
        }
    }
    tracing::info!(target: "opsim::config", scenario = %doc.name, units = oob.len(), "scenario.units_loaded");
    Ok(oob)
}

fn string_field(node: &Value, key: &str) -> Option<String> {
    node.get(key).and_then(Value::as_str).map(str::to_string)
}

/// Resolve the terrain named by a document.
pub fn load_terrain(
    doc: &ScenarioDocument,
    scenario_dir: &Path,
) -> Result<(TerrainMap, GeoTranslator, Infrastructure), LoadError> {
    if let Some(map) = &doc.map {
        let package = crate::terrain::MapPackage::load(&scenario_dir.join(map))?;
        return Ok((package.terrain, package.geo, package.infrastructure));
    }
    let inline = doc.terrain.clone().unwrap_or(InlineTerrain {
        width_km: 100.0,
        height_km: 100.0,
        km_per_px: default_km_per_px(),
        class: default_class(),
        reference: None,
    });
    let terrain = TerrainMap::uniform(inline.width_km, inline.height_km, inline.km_per_px, inline.class);
    let geo = match &inline.reference {
        Some(reference) => GeoTranslator::bound(
            &reference.mgrs,
            sim_runtime::Point::new(reference.xy[0], reference.xy[1]),
        )
        .map_err(MapError::from)?,
        None => GeoTranslator::default(),
    };
    Ok((terrain, geo, Infrastructure::default()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sim_runtime::{Point, SupplyClass};

    fn doc() -> ScenarioDocument {
        ScenarioDocument::from_json_str(
            r#"{
                "name": "templates",
                "templates": {
                    "eyes": { "sensors": [ { "name": "eyes", "signal": "visual", "max_range_km": 4.0 } ] },
                    "fire_team": {
                        "echelon": "team",
                        "personnel": { "rifleman": 4 },
                        "capacity": { "I": 0.1, "V": 0.2 },
                        "models": { "intelligence": { "template": "eyes" }, "movement": { "mode": "foot" } }
                    },
                    "loop": { "template": "loop" }
                },
                "units": [
                    { "template": "fire_team", "name": "A TEAM", "side": "blue", "location": "xy:10,12",
                      "hq": "1 PLT", "models": { "movement": { "speed_kph": 3.0 } } }
                ]
            }"#,
        )
        .unwrap()
    }

    fn ctx<'a>(infra: &'a Infrastructure, geo: &'a GeoTranslator) -> LoadContext<'a> {
        LoadContext {
            infrastructure: infra,
            geo,
        }
    }

    #[test]
    fn siblings_override_the_template() {
        let doc = doc();
        let (infra, geo) = (Infrastructure::default(), GeoTranslator::default());
        let (unit, links) = load_unit(&doc, &doc.units[0], UnitId(1), &ctx(&infra, &geo)).unwrap();
        assert_eq!(unit.name, "A TEAM");
        assert_eq!(unit.echelon, "team");
        assert_eq!(unit.point(), Point::new(10.0, 12.0));
        assert_eq!(unit.supply().get(SupplyClass::V), 0.2);
        assert_eq!(unit.models.intelligence.sensors.len(), 1);
        assert_eq!(unit.models.movement.mode, "foot");
        assert_eq!(unit.models.movement.speed_kph, Some(3.0));
        assert_eq!(links.hq.as_deref(), Some("1 PLT"));
    }

    #[test]
    fn unknown_templates_fail() {
        let doc = doc();
        let (infra, geo) = (Infrastructure::default(), GeoTranslator::default());
        let node = json!({ "template": "platoon", "name": "x", "side": "red", "location": "xy:0,0" });
        let err = load_unit(&doc, &node, UnitId(2), &ctx(&infra, &geo)).unwrap_err();
        assert!(matches!(err, LoadError::TemplateNotFound(name) if name == "platoon"));
    }

    #[test]
    fn self_referencing_templates_are_cycles() {
        let err = doc().expand(&json!({ "template": "loop" })).unwrap_err();
        assert!(matches!(err, LoadError::TemplateCycle(_)));
    }

    #[test]
    fn models_load_by_kind() {
        let doc = doc();
        let mut models = Models::default();
        load_model(&doc, &json!({ "base": 0.7 }), ModelKind::C3, &mut models).unwrap();
        assert_eq!(models.c3.base, 0.7);
        assert!(matches!(ModelKind::parse("sonar"), Err(LoadError::UnknownKind(_))));
    }

    #[test]
    fn oob_links_resolve_by_name() {
        let doc = ScenarioDocument::from_json_str(
            r#"{
                "units": [
                    { "name": "1 PLT", "side": "blue", "location": "xy:5,5" },
                    { "name": "SPT", "side": "blue", "kind": "css", "location": "xy:0,0" },
                    { "name": "A", "side": "blue", "location": "xy:6,5", "hq": "1 PLT", "css_unit": "SPT" }
                ]
            }"#,
        )
        .unwrap();
        let (infra, geo) = (Infrastructure::default(), GeoTranslator::default());
        let mut ids = IdAllocator::default();
        let oob = build_oob(&doc, &ctx(&infra, &geo), &mut ids, 8).unwrap();
        let plt = oob.id_by_name("1 PLT").unwrap();
        let spt = oob.id_by_name("SPT").unwrap();
        let a = oob.find_by_name("A").unwrap();
        assert_eq!(a.hq(), Some(plt));
        assert_eq!(a.staff.css_unit(), Some(spt));
        assert!(oob.get(spt).unwrap().models.logistics.css);
    }

    #[test]
    fn dangling_hq_names_fail() {
        let doc = ScenarioDocument::from_json_str(
            r#"{ "units": [ { "name": "A", "side": "blue", "location": "xy:6,5", "hq": "ghost" } ] }"#,
        )
        .unwrap();
        let (infra, geo) = (Infrastructure::default(), GeoTranslator::default());
        let err = build_oob(&doc, &ctx(&infra, &geo), &mut IdAllocator::default(), 8).unwrap_err();
        assert!(matches!(err, LoadError::UnknownReference { name, .. } if name == "ghost"));
    }

    #[test]
    fn missing_location_is_reported() {
        let doc = doc();
        let (infra, geo) = (Infrastructure::default(), GeoTranslator::default());
        let node = json!({ "name": "lost", "side": "red" });
        let err = load_unit(&doc, &node, UnitId(3), &ctx(&infra, &geo)).unwrap_err();
        assert!(matches!(err, LoadError::MissingField { field: "location", .. }));
    }
}
