//! Convoys, LOGPACs and the tasks that move supply between them.
//!
//! A CSS unit answers a SUPREQ with [`DispatchSupply`], which spawns a convoy
//! carrying the order `Pickup → Ferry → DropOff → Ferry → ConvoyMerge`. The
//! drop-off leaves a LOGPAC at the drop point; the requester absorbs it
//! through [`Resupply`]/[`FieldResupply`] or, opportunistically, [`Sustain`].

use serde::{Deserialize, Serialize};
use sim_runtime::{Point, SupplyPackage};

use super::{
    nominal_speed, Ferry, ProcessOutput, Progress, Task, TaskContext, TaskError, TaskKind,
    WorldView, SUPPORT,
};
use crate::effects::{Spawn, Transfer};
use crate::logistics::{replenishment_for, validate_request, Logistician};
use crate::messages::{Message, SupplyRequest, SupplyRequestKind};
use crate::opord::Opord;
use crate::unit::{LogpacInfo, Stance, Unit, UnitId, UnitKind};

/// Hours a requester waits for its LOGPAC before giving up.
pub const SUPREQ_TIMEOUT_HOURS: f64 = 24.0;

const CONVOY_RADIUS_KM: f64 = 0.2;
const DROP_OFF_HOURS: f64 = 0.25;

/// A LOGPAC addressed to `unit` that overlaps its footprint and is not
/// already being absorbed. `uid` narrows the search to one request.
pub(crate) fn find_logpac(unit: &Unit, world: &WorldView<'_>, uid: Option<u64>) -> Option<UnitId> {
    world
        .oob
        .iter()
        .filter(|l| !l.delete_me && !unit.staff.absorbing.contains(&l.id))
        .filter(|l| {
            l.logpac.as_ref().is_some_and(|info| {
                info.recipient == unit.id && uid.map_or(true, |uid| info.supreq_uid == uid)
            })
        })
        .find(|l| l.footprint().overlaps(unit.footprint()))
        .map(|l| l.id)
}

/// Ask the unit's CSS for enough supply to reach the policy maximum.
/// Returns the uid of the request, or `None` when nothing is needed.
pub(crate) fn raise_supreq(
    unit: &mut Unit,
    ctx: &mut TaskContext<'_>,
    kind: SupplyRequestKind,
    dp: Point,
) -> Result<Option<u64>, TaskError> {
    let css = unit
        .staff
        .css_unit()
        .ok_or(TaskError::NoSupplySource(unit.id))?;
    let commodity = replenishment_for(unit, unit.staff.sop.supply.max);
    if commodity.total() <= 0.0 {
        return Ok(None);
    }
    let now = ctx.now();
    let request = SupplyRequest {
        uid: ctx.ids.supply_request(),
        unit: unit.id,
        kind,
        commodity,
        dp,
        css,
        route: Vec::new(),
        eta: None,
        issued: now,
    };
    let uid = request.uid;
    unit.staff.pending_supreqs.push(request.clone());
    ctx.effects.send(unit.id, css, Message::Supreq(request));
    unit.log.info(now, "opsim::logistics", format!("SUPREQ {uid} sent to {css}"));
    tracing::debug!(
        target: "opsim::logistics",
        unit = %unit.id,
        css = %css,
        uid,
        tons = commodity.total(),
        "supreq.sent"
    );
    Ok(Some(uid))
}

/// Soaking up a LOGPAC over footprint radius / mean in-footprint speed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Absorption {
    pub logpac: UnitId,
    #[serde(default)]
    pub remaining_hours: Option<f64>,
}

impl Absorption {
    pub fn new(logpac: UnitId) -> Self {
        Self {
            logpac,
            remaining_hours: None,
        }
    }

    /// Returns `true` once the LOGPAC is absorbed or gone.
    pub fn advance(&mut self, unit: &mut Unit, ctx: &mut TaskContext<'_>) -> bool {
        let world = ctx.world;
        let Some(logpac) = world.oob.get(self.logpac).filter(|l| !l.delete_me) else {
            unit.staff.absorbing.remove(&self.logpac);
            return true;
        };
        let remaining = match self.remaining_hours {
            Some(hours) => hours,
            None => {
                unit.staff.absorbing.insert(self.logpac);
                let mode = unit.models.movement.mode.clone();
                let friction = world.balance.friction(&mode);
                let speed = nominal_speed(unit, &mode, world.balance)
                    * world.terrain.mean_friction(unit.footprint(), &friction);
                if speed > 0.0 {
                    unit.position().footprint_radius() / speed
                } else {
                    0.0
                }
            }
        };
        let left = remaining - world.pulse_hours();
        if left > 1.0e-9 {
            self.remaining_hours = Some(left);
            return false;
        }

        let package = logpac.supply().clamped_non_negative();
        ctx.effects.transfers.push(Transfer {
            from: logpac.id,
            to: unit.id,
            package,
        });
        ctx.effects.deletions.push(logpac.id);
        ctx.effects.counters.logpacs_absorbed += 1;
        if let Some(info) = &logpac.logpac {
            unit.staff
                .pending_supreqs
                .retain(|r| r.uid != info.supreq_uid);
        }
        unit.staff.absorbing.remove(&self.logpac);
        self.remaining_hours = Some(0.0);
        unit.log.info(
            ctx.now(),
            "opsim::logistics",
            format!("absorbed {} ({:.3} t)", logpac.name, package.total()),
        );
        tracing::info!(
            target: "opsim::logistics",
            unit = %unit.id,
            logpac = %logpac.id,
            tons = package.total(),
            "logpac.absorbed"
        );
        true
    }
}

/// Load freight from the CSS store onto the convoy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pickup {
    pub from: UnitId,
    pub commodity: SupplyPackage,
    #[serde(default)]
    pub remaining_hours: Option<f64>,
}

impl Pickup {
    pub fn new(from: UnitId, commodity: SupplyPackage) -> Self {
        Self {
            from,
            commodity,
            remaining_hours: None,
        }
    }

    pub(super) fn process(&mut self, out: &mut ProcessOutput, ctx: &mut TaskContext<'_>) -> Result<(), TaskError> {
        out.task_time = ctx.world.balance.css.load_hours;
        out.codes = vec![SUPPORT.to_string()];
        Ok(())
    }

    pub(super) fn step(&mut self, unit: &mut Unit, ctx: &mut TaskContext<'_>) -> Result<Progress, TaskError> {
        let world = ctx.world;
        if !world.oob.contains(self.from) {
            return Err(TaskError::UnknownUnit(self.from));
        }
        let left = self.remaining_hours.unwrap_or(world.balance.css.load_hours) - world.pulse_hours();
        if left > 1.0e-9 {
            self.remaining_hours = Some(left);
            return Ok(Progress::Running);
        }
        self.remaining_hours = Some(0.0);
        ctx.effects.transfers.push(Transfer {
            from: self.from,
            to: unit.id,
            package: self.commodity,
        });
        Ok(Progress::Complete)
    }
}

/// Leave the cargo at the drop point as a LOGPAC.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DropOff {
    pub supreq_uid: u64,
    pub recipient: UnitId,
}

impl DropOff {
    pub(super) fn process(&mut self, out: &mut ProcessOutput) -> Result<(), TaskError> {
        out.task_time = DROP_OFF_HOURS;
        out.codes = vec![SUPPORT.to_string()];
        Ok(())
    }

    pub(super) fn step(&mut self, unit: &mut Unit, ctx: &mut TaskContext<'_>) -> Result<Progress, TaskError> {
        let package = unit.supply().clamped_non_negative();
        if package.total() <= 0.0 {
            unit.log.warn(ctx.now(), "opsim::logistics", "drop-off with an empty load");
            return Ok(Progress::Complete);
        }
        let balance = ctx.world.balance;
        let id = UnitId(ctx.ids.unit());
        let mut logpac = Unit::new(id, format!("LOGPAC {}", self.supreq_uid), unit.side.clone())
            .with_kind(UnitKind::Logpac)
            .at(unit.point(), balance.css.logpac_radius_km)
            .with_supply(package, 1.0);
        logpac.logpac = Some(LogpacInfo {
            supreq_uid: self.supreq_uid,
            recipient: self.recipient,
        });
        unit.expend_supply(package);
        ctx.effects.spawns.push(Spawn {
            unit: logpac,
            hq: unit.hq(),
            opord: None,
        });
        ctx.effects.counters.logpacs_spawned += 1;
        unit.log.info(
            ctx.now(),
            "opsim::logistics",
            format!("LOGPAC {} dropped for {}", self.supreq_uid, self.recipient),
        );
        tracing::info!(
            target: "opsim::logistics",
            convoy = %unit.id,
            logpac = %id,
            recipient = %self.recipient,
            uid = self.supreq_uid,
            tons = package.total(),
            "logpac.spawned"
        );
        Ok(Progress::Complete)
    }
}

/// Hand unused freight back to the CSS and dissolve the convoy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvoyMerge {
    pub into: UnitId,
}

impl ConvoyMerge {
    pub(super) fn process(&mut self, out: &mut ProcessOutput) -> Result<(), TaskError> {
        out.task_time = 0.0;
        Ok(())
    }

    pub(super) fn step(&mut self, unit: &mut Unit, ctx: &mut TaskContext<'_>) -> Result<Progress, TaskError> {
        let leftover = unit.supply().clamped_non_negative();
        if leftover.total() > 0.0 && ctx.world.oob.contains(self.into) {
            ctx.effects.transfers.push(Transfer {
                from: unit.id,
                to: self.into,
                package: leftover,
            });
        }
        ctx.effects.deletions.push(unit.id);
        tracing::debug!(target: "opsim::logistics", convoy = %unit.id, into = %self.into, "convoy.merged");
        Ok(Progress::Complete)
    }
}

fn unloaded_pickups(tasks: &[Task], css: UnitId) -> SupplyPackage {
    let mut load = SupplyPackage::default();
    for task in tasks.iter().filter(|t| !t.is_finished()) {
        if let TaskKind::Pickup(pickup) = &task.kind {
            if pickup.from == css {
                load += pickup.commodity;
            }
        }
    }
    load
}

/// Freight of `css` already promised to convoys: loads they have not picked
/// up yet, and pickups made this pulse whose transfer is still pending.
fn committed_freight(css: UnitId, ctx: &TaskContext<'_>) -> SupplyPackage {
    let mut committed = SupplyPackage::default();
    let convoys = ctx
        .world
        .oob
        .iter()
        .filter(|u| !u.delete_me && u.kind == UnitKind::Convoy);
    for convoy in convoys {
        if let Some(opord) = &convoy.staff.opord {
            committed += unloaded_pickups(opord.tasks(), css);
        }
        for envelope in &convoy.staff.inbox {
            if let Message::Opord(opord) = &envelope.message {
                committed += unloaded_pickups(opord.tasks(), css);
            }
        }
    }
    for spawn in &ctx.effects.spawns {
        if let Some(opord) = &spawn.opord {
            committed += unloaded_pickups(opord.tasks(), css);
        }
    }
    for transfer in ctx.effects.transfers.iter().filter(|t| t.from == css) {
        committed += transfer.package;
    }
    committed
}

/// Answer one SUPREQ at a CSS unit by sending out a convoy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchSupply {
    pub request: SupplyRequest,
}

impl DispatchSupply {
    pub fn new(request: SupplyRequest) -> Self {
        Self { request }
    }

    pub(super) fn process(
        &mut self,
        out: &mut ProcessOutput,
        unit: &mut Unit,
        ctx: &mut TaskContext<'_>,
    ) -> Result<(), TaskError> {
        if !unit.is_css() {
            return Err(TaskError::NoSupplySource(self.request.unit));
        }
        out.task_time = ctx.world.balance.css.load_hours;
        out.codes = vec![SUPPORT.to_string()];
        Ok(())
    }

    pub(super) fn step(&mut self, unit: &mut Unit, ctx: &mut TaskContext<'_>) -> Result<Progress, TaskError> {
        let world = ctx.world;
        let balance = world.balance;
        let request = &self.request;
        if !world.oob.contains(request.unit) {
            return Err(TaskError::UnknownUnit(request.unit));
        }
        let css = &balance.css;
        let lift = balance
            .kit(&css.convoy_kit)
            .map_or(0.0, |kit| kit.freight_lift * css.convoy_size as f64);
        let on_hand = *unit.supply() - committed_freight(unit.id, ctx);
        let fraction = validate_request(&request.commodity, &on_hand, &css.dispatch_overhead, Some(lift));
        if fraction <= 0.0 {
            unit.log.warn(
                ctx.now(),
                "opsim::logistics",
                format!("SUPREQ {} from {} cannot be filled", request.uid, request.unit),
            );
            tracing::warn!(target: "opsim::logistics", css = %unit.id, uid = request.uid, "supply.dispatch_refused");
            return Ok(Progress::Complete);
        }

        let load = request.commodity * fraction;
        let id = UnitId(ctx.ids.unit());
        let mut convoy = Unit::new(id, format!("{} convoy {}", unit.name, request.uid), unit.side.clone())
            .with_kind(UnitKind::Convoy)
            .with_vehicles(css.convoy_kit.clone(), css.convoy_size)
            .at(unit.point(), CONVOY_RADIUS_KM)
            .with_stance(Stance::Transit)
            .with_supply(load, 0.0);
        convoy.models.movement.mode = css.convoy_mode.clone();

        let home = unit.point();
        let tasks = vec![
            Task::new(TaskKind::Pickup(Pickup::new(unit.id, load))),
            Task::new(TaskKind::Ferry(Ferry::new(request.dp))),
            Task::new(TaskKind::DropOff(DropOff {
                supreq_uid: request.uid,
                recipient: request.unit,
            })),
            Task::new(TaskKind::Ferry(Ferry::new(home))),
            Task::new(TaskKind::ConvoyMerge(ConvoyMerge { into: unit.id })),
        ];
        let mut opord = Opord::new(tasks, ctx.now());
        opord.issued_by = Some(unit.id);
        ctx.effects.spawns.push(Spawn {
            unit: convoy,
            hq: Some(unit.id),
            opord: Some(opord),
        });
        ctx.effects.counters.convoys_dispatched += 1;
        unit.log.info(
            ctx.now(),
            "opsim::logistics",
            format!("convoy {id} dispatched for SUPREQ {}", request.uid),
        );
        tracing::info!(
            target: "opsim::logistics",
            css = %unit.id,
            convoy = %id,
            uid = request.uid,
            tons = load.total(),
            "convoy.dispatched"
        );
        Ok(Progress::Complete)
    }
}

/// Request a LOGPAC at a drop point and wait for it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Resupply {
    /// Drop point; the unit's position when unset.
    #[serde(default)]
    pub dp: Option<Point>,
    #[serde(default)]
    pub uid: Option<u64>,
    #[serde(default)]
    pub waited_hours: f64,
}

impl Resupply {
    pub fn at(dp: Point) -> Self {
        Self {
            dp: Some(dp),
            ..Self::default()
        }
    }

    pub(super) fn process(
        &mut self,
        out: &mut ProcessOutput,
        unit: &mut Unit,
        ctx: &mut TaskContext<'_>,
    ) -> Result<(), TaskError> {
        let dp = self.dp.unwrap_or_else(|| unit.point());
        if self.uid.is_none() {
            self.uid = raise_supreq(unit, ctx, SupplyRequestKind::Normal, dp)?;
        }
        out.task_time = ctx.world.balance.css.load_hours;
        out.codes = vec![SUPPORT.to_string()];
        Ok(())
    }

    pub(super) fn step(&mut self, unit: &mut Unit, ctx: &mut TaskContext<'_>) -> Result<Progress, TaskError> {
        let Some(uid) = self.uid else {
            return Ok(Progress::Complete);
        };
        if !unit.staff.pending_supreqs.iter().any(|r| r.uid == uid) {
            // Absorbed by another task or expired.
            return Ok(Progress::Complete);
        }
        if let Some(logpac) = find_logpac(unit, ctx.world, Some(uid)) {
            unit.staff.absorbing.insert(logpac);
            return Ok(Progress::Spawn(vec![Task::new(TaskKind::FieldResupply(
                FieldResupply::new(logpac),
            ))]));
        }
        self.waited_hours += ctx.world.pulse_hours();
        if self.waited_hours >= SUPREQ_TIMEOUT_HOURS {
            unit.staff.pending_supreqs.retain(|r| r.uid != uid);
            unit.log.warn(ctx.now(), "opsim::logistics", format!("SUPREQ {uid} never arrived"));
            tracing::warn!(target: "opsim::logistics", unit = %unit.id, uid, "supreq.timed_out");
            return Ok(Progress::Complete);
        }
        Ok(Progress::Running)
    }
}

/// Absorb one LOGPAC in the field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldResupply {
    pub absorption: Absorption,
}

impl FieldResupply {
    pub fn new(logpac: UnitId) -> Self {
        Self {
            absorption: Absorption::new(logpac),
        }
    }

    pub(super) fn process(&mut self, out: &mut ProcessOutput) -> Result<(), TaskError> {
        out.codes = vec![SUPPORT.to_string()];
        Ok(())
    }

    pub(super) fn step(&mut self, unit: &mut Unit, ctx: &mut TaskContext<'_>) -> Result<Progress, TaskError> {
        if self.absorption.advance(unit, ctx) {
            Ok(Progress::Complete)
        } else {
            Ok(Progress::Running)
        }
    }
}

/// Standing background task: keeps the store above the policy minimum and
/// absorbs any LOGPAC addressed to the unit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Sustain {
    #[serde(default)]
    pub absorbing: Option<Absorption>,
}

impl Sustain {
    pub(super) fn process(&mut self, out: &mut ProcessOutput) -> Result<(), TaskError> {
        out.task_time = 0.0;
        Ok(())
    }

    pub(super) fn step(&mut self, unit: &mut Unit, ctx: &mut TaskContext<'_>) -> Result<Progress, TaskError> {
        if let Some(absorption) = self.absorbing.as_mut() {
            if absorption.advance(unit, ctx) {
                self.absorbing = None;
            }
            return Ok(Progress::Running);
        }
        if let Some(logpac) = find_logpac(unit, ctx.world, None) {
            let mut absorption = Absorption::new(logpac);
            if !absorption.advance(unit, ctx) {
                self.absorbing = Some(absorption);
            }
            return Ok(Progress::Running);
        }
        let policy = unit.staff.sop.supply;
        if unit.cargo_level() < policy.min
            && unit.staff.pending_supreqs.is_empty()
            && unit.staff.css_unit().is_some()
        {
            let dp = unit.point();
            raise_supreq(unit, ctx, SupplyRequestKind::Normal, dp)?;
        }
        Ok(Progress::Running)
    }
}
