//! The staff attached to every unit: inbox handling, order processing and
//! the S1–S6 routines run once per pulse in the Staffwork phase.

use std::collections::{BTreeSet, VecDeque};

use serde::{Deserialize, Serialize};
use sim_runtime::{rubberband, Point, Polygon, SupplyPackage};

use crate::balance_config::{BalanceConfig, MoraleBalance};
use crate::intelligence::{age_contacts, merge_contact, Contact};
use crate::logistics::{compute_resupply_burden, split_commodity, Logistician, IDLE};
use crate::messages::{screen, Envelope, Message, Report, SupplyRequest};
use crate::oob::Oob;
use crate::opord::Opord;
use crate::reports;
use crate::resources::{SimDuration, SimTime};
use crate::tasks::{
    first_open, hostile_contact, process_all, push_planned_begin_time, DispatchSupply, PlanState,
    Resupply, Sustain, Task, TaskContext, TaskError, TaskId, TaskKind,
};
use crate::unit::{Unit, UnitId, UnitKind};

/// Pending SUPREQs older than this are forgotten.
const SUPREQ_EXPIRY_HOURS: f64 = 24.0;
/// How far ahead the projected-resupply search looks past the last task.
const PROJECTION_HORIZON_HOURS: f64 = 24.0;

/// When a moving unit may hold its position for a pulse instead of
/// pushing on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum YieldPolicy {
    #[default]
    Never,
    /// Hold once when terrain cuts speed below a fraction of nominal.
    SlowTerrain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    #[default]
    Timing,
    Readiness,
}

/// Cargo levels, as fractions of capacity, that trigger and bound resupply.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupplyPolicy {
    pub min: f64,
    pub max: f64,
}

impl Default for SupplyPolicy {
    fn default() -> Self {
        Self { min: 0.3, max: 1.0 }
    }
}

/// Standing operating procedures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Sop {
    pub weapons_free: bool,
    pub sitrep_hours: f64,
    pub intsum_hours: f64,
    pub css_unit: Option<UnitId>,
    pub supply: SupplyPolicy,
    pub priority: Priority,
    pub yield_policy: YieldPolicy,
}

impl Default for Sop {
    fn default() -> Self {
        Self {
            weapons_free: false,
            sitrep_hours: 6.0,
            intsum_hours: 12.0,
            css_unit: None,
            supply: SupplyPolicy::default(),
            priority: Priority::default(),
            yield_policy: YieldPolicy::default(),
        }
    }
}

impl Sop {
    pub fn should_yield(&self, speed: f64, nominal: f64, slow_fraction: f64) -> bool {
        match self.yield_policy {
            YieldPolicy::Never => false,
            YieldPolicy::SlowTerrain => {
                self.priority == Priority::Readiness && speed < nominal * slow_fraction
            }
        }
    }
}

/// Coarse morale state announced by public affairs when it changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoraleBand {
    Steady,
    Shaken,
    Broken,
}

impl MoraleBand {
    pub fn of(morale: f64, balance: &MoraleBalance) -> Self {
        if morale < balance.broken {
            MoraleBand::Broken
        } else if morale < balance.shaken {
            MoraleBand::Shaken
        } else {
            MoraleBand::Steady
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MoraleBand::Steady => "steady",
            MoraleBand::Shaken => "shaken",
            MoraleBand::Broken => "broken",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Staff {
    pub opord: Option<Opord>,
    /// Concurrent tasks stepped alongside the order, e.g. `Sustain`.
    pub background: Vec<Task>,
    pub inbox: VecDeque<Envelope>,
    /// Messages that failed the suppression test, retried next pulse.
    pub overflow: VecDeque<Envelope>,
    pub codewords: BTreeSet<String>,
    pub sitrep_requested: bool,
    pub intsum_requested: bool,
    pub next_sitrep: Option<SimTime>,
    pub next_intsum: Option<SimTime>,
    /// SUPREQs accepted by a CSS unit and waiting for a convoy.
    pub css_queue: VecDeque<SupplyRequest>,
    /// Own SUPREQs not yet absorbed.
    pub pending_supreqs: Vec<SupplyRequest>,
    /// LOGPACs claimed by one of this unit's tasks.
    pub absorbing: BTreeSet<UnitId>,
    pub sop: Sop,
    pub combat_ineffective: bool,
    /// Last band announced to the side; `None` until first assessed.
    pub morale_band: Option<MoraleBand>,
}

impl Staff {
    pub fn css_unit(&self) -> Option<UnitId> {
        self.sop.css_unit
    }

    pub fn h_hour(&self) -> Option<SimTime> {
        self.opord.as_ref().and_then(|o| o.execution.h_hour)
    }
}

/// StepAll for one unit: the order's current task, the background tasks,
/// then the pulse's supply expenditure.
pub fn step_unit(unit: &mut Unit, ctx: &mut TaskContext<'_>) {
    let now = ctx.now();
    if let Some(mut opord) = unit.staff.opord.take() {
        let h_hour = opord.execution.h_hour;
        opord.refresh_cursor();
        let cursor = opord.execution.cursor;
        if let Some(task) = opord.execution.maneuver_tasks.get_mut(cursor) {
            if task.can_begin(now, h_hour, &unit.staff.codewords) {
                if let Err(error) = task.step(unit, ctx, h_hour) {
                    task.force_end(unit, ctx, &error);
                }
            }
        }
        opord.refresh_cursor();
        unit.staff.opord = Some(opord);
    }

    let mut background = std::mem::take(&mut unit.staff.background);
    let h_hour = unit.staff.h_hour();
    for task in background.iter_mut() {
        if !task.can_begin(now, h_hour, &unit.staff.codewords) {
            continue;
        }
        if let Err(error) = task.step(unit, ctx, h_hour) {
            task.force_end(unit, ctx, &error);
        }
    }
    background.retain(|t| !t.is_finished());
    background.append(&mut unit.staff.background);
    unit.staff.background = background;

    if !unit.is_transient() {
        let codes: Vec<&str> = if unit.activity.is_empty() {
            vec![IDLE]
        } else {
            unit.activity.iter().map(String::as_str).collect()
        };
        let spent = unit.expenditure(&codes, ctx.world.pulse_hours(), ctx.world.balance);
        unit.expend_supply(spent);
    }
}

/// Staffwork for one unit: drain the inbox, then S1 to S6 in order.
pub fn staffwork(unit: &mut Unit, ctx: &mut TaskContext<'_>) {
    drain_inbox(unit, ctx);
    personnel(unit, ctx);
    intelligence(unit, ctx);
    operations(unit, ctx);
    logistics(unit, ctx);
    public_affairs(unit, ctx);
    communications(unit, ctx);
}

fn drain_inbox(unit: &mut Unit, ctx: &mut TaskContext<'_>) {
    let mut queue = std::mem::take(&mut unit.staff.overflow);
    queue.append(&mut unit.staff.inbox);
    if queue.is_empty() {
        return;
    }
    let (read, deferred) = screen(queue, ctx.world.sim.message_suppression, &mut *ctx.rng);
    ctx.effects.counters.messages_delivered += read.len() as u64;
    ctx.effects.counters.messages_suppressed += deferred.len() as u64;
    unit.staff.overflow = deferred;

    for envelope in read {
        let kind = envelope.message.kind();
        tracing::trace!(target: "opsim::staff", unit = %unit.id, id = envelope.id, kind, "message.read");
        match envelope.message {
            Message::Opord(opord) => process_opord(unit, *opord, ctx),
            Message::Supreq(request) => process_supreq(unit, request, ctx),
            Message::Sitrep(report)
            | Message::Intsum(report)
            | Message::Cntrep(report)
            | Message::Pasum(report) => process_report(unit, &report),
            Message::Codeword { word } => {
                unit.log.info(ctx.now(), "opsim::staff", format!("codeword {word} received"));
                unit.staff.codewords.insert(word);
            }
        }
    }
}

fn process_report(unit: &mut Unit, report: &Report) {
    let own = unit.contact_key();
    for contact in &report.contacts {
        if contact.key == own || contact.target == unit.id {
            continue;
        }
        merge_contact(&mut unit.contacts, contact);
    }
}

/// Queue a SUPREQ at a CSS unit. Requests whose burden on the CSS exceeds
/// the split threshold are broken into several convoy loads.
fn process_supreq(unit: &mut Unit, request: SupplyRequest, ctx: &mut TaskContext<'_>) {
    let now = ctx.now();
    if !unit.is_css() {
        unit.log.warn(now, "opsim::logistics", format!("SUPREQ {} dropped: not a CSS unit", request.uid));
        tracing::warn!(target: "opsim::logistics", unit = %unit.id, uid = request.uid, "supreq.misrouted");
        return;
    }
    let world = ctx.world;
    let balance = world.balance;
    let speed = balance.nominal_speed_kph(&balance.css.convoy_mode);
    let transit_hours = if speed > 0.0 {
        unit.point().distance(request.dp) / speed
    } else {
        0.0
    };
    let supported: Vec<&Unit> = world.oob.get(request.unit).into_iter().collect();
    let burden = compute_resupply_burden(
        &supported,
        transit_hours,
        unit.freight_lift(balance),
        balance,
    );
    let threshold = balance.css.burden_split_threshold;
    let pieces = if burden > threshold && threshold > 0.0 && burden.is_finite() {
        (burden / threshold).ceil().max(1.0)
    } else {
        1.0
    };
    let chunk = request.commodity.total() / pieces;
    let loads = split_commodity(&request.commodity, chunk);
    tracing::debug!(
        target: "opsim::logistics",
        css = %unit.id,
        uid = request.uid,
        burden,
        loads = loads.len(),
        "supreq.accepted"
    );
    unit.log.info(
        now,
        "opsim::logistics",
        format!("SUPREQ {} from {} queued in {} load(s)", request.uid, request.unit, loads.len()),
    );
    for commodity in loads {
        unit.staff.css_queue.push_back(SupplyRequest {
            commodity,
            ..request.clone()
        });
    }
}

/// Take an order (or FRAGO) into the staff: stamp it, fold in its
/// sections, process the tasks and lay out their planned times.
pub fn process_opord(unit: &mut Unit, mut opord: Opord, ctx: &mut TaskContext<'_>) {
    let now = ctx.now();
    opord.received = Some(now);
    for contact in &opord.situation.enemy {
        merge_contact(&mut unit.contacts, contact);
    }
    for word in &opord.command_signal.codewords {
        unit.staff.codewords.insert(word.clone());
    }
    let sop = &mut unit.staff.sop;
    if let Some(css) = opord.service_support.css_unit {
        sop.css_unit = Some(css);
    }
    if let Some(policy) = opord.service_support.supply_policy {
        sop.supply = policy;
    }
    if let Some(hours) = opord.command_signal.sitrep_hours {
        sop.sitrep_hours = hours;
    }
    if let Some(free) = opord.command_signal.weapons_free {
        sop.weapons_free = free;
    }

    let kind = if opord.frago { "frago" } else { "opord" };
    let mut current = match (opord.frago, unit.staff.opord.take()) {
        (true, Some(mut current)) => {
            let replaced = current.overlay_frago(opord);
            cancel_all(replaced, unit, ctx);
            current
        }
        (_, previous) => {
            if let Some(previous) = previous {
                cancel_all(previous.execution.maneuver_tasks, unit, ctx);
            }
            opord.frago = false;
            opord
        }
    };
    let h_hour = *current.execution.h_hour.get_or_insert(now);

    let tasks = std::mem::take(&mut current.execution.maneuver_tasks);
    let mut plan = PlanState::of(unit);
    let (concurrent, mut sequence): (Vec<Task>, Vec<Task>) = process_all(tasks, unit, &mut plan, ctx)
        .into_iter()
        .partition(|t| t.concurrent && !t.is_finished());
    unit.staff.background.extend(concurrent);
    push_planned_begin_time(&mut sequence, now, Some(h_hour));

    if let Some(index) = projected_resupply_index(unit, &sequence, now, ctx.world.balance) {
        let dp = position_at(unit, &sequence, sequence_begin(&sequence, index, now));
        let mut plan = PlanState { position: dp, stance: unit.stance() };
        let resupply = Task::new(TaskKind::Resupply(Resupply::at(dp)));
        let inserted = process_all(vec![resupply], unit, &mut plan, ctx);
        if !inserted.is_empty() {
            tracing::debug!(target: "opsim::logistics", unit = %unit.id, index, "resupply.projected");
            for (offset, task) in inserted.into_iter().enumerate() {
                sequence.insert(index + offset, task);
            }
            push_planned_begin_time(&mut sequence, now, Some(h_hour));
        }
    }

    current.execution.maneuver_tasks = sequence;
    current.refresh_cursor();
    let count = current.execution.maneuver_tasks.len();
    unit.log.info(now, "opsim::staff", format!("{kind} processed: {count} task(s)"));
    tracing::info!(target: "opsim::staff", unit = %unit.id, kind, tasks = count, "order.processed");
    unit.staff.opord = Some(current);
}

fn sequence_begin(sequence: &[Task], index: usize, now: SimTime) -> SimTime {
    sequence
        .get(index)
        .and_then(|t| t.planned_begin)
        .unwrap_or(now)
}

/// Index of the task before which a resupply has to happen, when the store
/// is projected to fall under the policy minimum.
fn projected_resupply_index(
    unit: &Unit,
    sequence: &[Task],
    now: SimTime,
    balance: &BalanceConfig,
) -> Option<usize> {
    if unit.capacity.total() <= 0.0
        || unit.is_css()
        || unit.kind != UnitKind::Combat
        || unit.staff.css_unit().is_none()
        || !unit.staff.pending_supreqs.is_empty()
    {
        return None;
    }
    let min = unit.staff.sop.supply.min;
    let when = time_at_cargo(unit, sequence, min, now, balance)?;
    let index = sequence
        .iter()
        .position(|t| !t.is_finished() && t.planned_end.is_some_and(|end| end >= when))?;
    // Already under the minimum: resupply before the first open task.
    Some(index.max(first_open(sequence)))
}

fn cancel_all(tasks: Vec<Task>, unit: &mut Unit, ctx: &mut TaskContext<'_>) {
    for mut task in tasks {
        if !task.is_finished() {
            task.cancel(unit, ctx);
        }
    }
}

/// Cancel a task anywhere in the order or the background list. An
/// unstarted top-level task is dropped from its list.
pub fn cancel_task(unit: &mut Unit, id: TaskId, ctx: &mut TaskContext<'_>) -> Result<(), TaskError> {
    let mut found = false;
    if let Some(mut opord) = unit.staff.opord.take() {
        found = cancel_in(&mut opord.execution.maneuver_tasks, id, unit, ctx);
        opord.refresh_cursor();
        unit.staff.opord = Some(opord);
    }
    if !found {
        let mut background = std::mem::take(&mut unit.staff.background);
        found = cancel_in(&mut background, id, unit, ctx);
        background.append(&mut unit.staff.background);
        unit.staff.background = background;
    }
    if !found {
        return Err(TaskError::UnknownTask(id));
    }
    unit.log.info(ctx.now(), "opsim::staff", format!("task {id} cancelled"));
    tracing::info!(target: "opsim::staff", unit = %unit.id, task = %id, "task.cancelled");
    Ok(())
}

fn cancel_in(tasks: &mut Vec<Task>, id: TaskId, unit: &mut Unit, ctx: &mut TaskContext<'_>) -> bool {
    if let Some(index) = tasks.iter().position(|t| t.id == id) {
        if !tasks[index].cancel(unit, ctx) {
            tasks.remove(index);
        }
        return true;
    }
    tasks
        .iter_mut()
        .any(|t| cancel_in(&mut t.subtasks, id, unit, ctx))
}

fn personnel(unit: &mut Unit, ctx: &mut TaskContext<'_>) {
    if unit.is_transient() {
        return;
    }
    let ineffective = unit.strength() < ctx.world.balance.combat.ineffective_fraction;
    if ineffective && !unit.staff.combat_ineffective {
        unit.log.warn(ctx.now(), "opsim::staff", "combat ineffective");
        tracing::info!(target: "opsim::staff", unit = %unit.id, strength = unit.strength(), "unit.combat_ineffective");
        unit.staff.sitrep_requested = true;
    }
    unit.staff.combat_ineffective = ineffective;
}

fn intelligence(unit: &mut Unit, ctx: &mut TaskContext<'_>) {
    if unit.is_transient() {
        return;
    }
    let now = ctx.now();
    let lost = age_contacts(&mut unit.contacts, now, ctx.world.sim.contact_timeout());
    for key in lost {
        unit.log.info(now, "opsim::intel", format!("contact {key} lost"));
        tracing::debug!(target: "opsim::intel", unit = %unit.id, contact = %key, "contact.lost");
    }

    let Some(hq) = unit.commander() else {
        return;
    };
    let fresh: Vec<Contact> = unit
        .contacts
        .values_mut()
        .filter(|c| c.is_direct() && !c.reported)
        .map(|c| {
            c.reported = true;
            c.as_report()
        })
        .collect();
    if !fresh.is_empty() {
        let report = reports::cntrep(unit, fresh, now);
        ctx.effects.send(unit.id, hq, Message::Cntrep(report));
    }

    let interval = SimDuration::from_hours(unit.staff.sop.intsum_hours);
    let due = *unit.staff.next_intsum.get_or_insert(now + interval);
    if unit.staff.intsum_requested || now >= due {
        let report = reports::intsum(unit, now);
        ctx.effects.send(unit.id, hq, Message::Intsum(report));
        unit.staff.intsum_requested = false;
        unit.staff.next_intsum = Some(now + interval);
    }
}

fn operations(unit: &mut Unit, ctx: &mut TaskContext<'_>) {
    if unit.kind == UnitKind::Combat && unit.capacity.total() > 0.0 {
        ensure_sustain(unit, ctx);
    }
    if unit.staff.sop.weapons_free {
        solve_initiate_engagement(unit, ctx);
    }
}

fn ensure_sustain(unit: &mut Unit, ctx: &mut TaskContext<'_>) {
    let present = unit
        .staff
        .background
        .iter()
        .any(|t| matches!(t.kind, TaskKind::Sustain(_)));
    if present {
        return;
    }
    let mut plan = PlanState::of(unit);
    let task = Task::new(TaskKind::Sustain(Sustain::default())).concurrent();
    let processed = process_all(vec![task], unit, &mut plan, ctx);
    unit.staff.background.extend(processed);
}

/// Ask for an engagement with the first hostile direct contact whose
/// footprint overlaps ours.
pub fn solve_initiate_engagement(unit: &Unit, ctx: &mut TaskContext<'_>) {
    let world = ctx.world;
    if unit.is_transient()
        || unit.staff.combat_ineffective
        || world.engagements.is_engaged(unit.id)
    {
        return;
    }
    let footprint = unit.footprint();
    let target = unit
        .contacts
        .values()
        .filter(|c| c.is_direct() && hostile_contact(unit, c, world.oob))
        .filter(|c| c.footprint().is_some_and(|f| f.overlaps(footprint)))
        .find(|c| world.oob.get(c.target).is_some_and(|t| !t.delete_me && !t.is_transient()))
        .map(|c| c.target);
    if let Some(target) = target {
        tracing::debug!(target: "opsim::combat", unit = %unit.id, target_unit = %target, "engagement.initiated");
        ctx.effects.engagement_requests.push((unit.id, target));
    }
}

fn logistics(unit: &mut Unit, ctx: &mut TaskContext<'_>) {
    let now = ctx.now();
    let expiry = SimDuration::from_hours(SUPREQ_EXPIRY_HOURS);
    let before = unit.staff.pending_supreqs.len();
    unit.staff
        .pending_supreqs
        .retain(|r| now < r.issued + expiry);
    let expired = before - unit.staff.pending_supreqs.len();
    if expired > 0 {
        unit.log.warn(now, "opsim::logistics", format!("{expired} SUPREQ(s) expired"));
    }

    if !unit.is_css() || unit.staff.css_queue.is_empty() {
        return;
    }
    let limit = ctx.world.balance.css.max_dispatch_per_pulse;
    let mut dispatched = Vec::new();
    while dispatched.len() < limit {
        let Some(request) = unit.staff.css_queue.pop_front() else {
            break;
        };
        dispatched.push(Task::new(TaskKind::DispatchSupply(DispatchSupply::new(request))).concurrent());
    }
    let mut plan = PlanState::of(unit);
    let processed = process_all(dispatched, unit, &mut plan, ctx);
    unit.staff.background.extend(processed);
}

/// Tell the side when the unit's morale band changes. The first
/// assessment only records the band.
fn public_affairs(unit: &mut Unit, ctx: &mut TaskContext<'_>) {
    if unit.is_transient() {
        return;
    }
    let band = MoraleBand::of(unit.morale(), &ctx.world.balance.morale);
    let Some(previous) = unit.staff.morale_band.replace(band) else {
        return;
    };
    if previous == band {
        return;
    }
    let now = ctx.now();
    unit.log.info(
        now,
        "opsim::staff",
        format!("morale {} to {}", previous.as_str(), band.as_str()),
    );
    tracing::debug!(
        target: "opsim::staff",
        unit = %unit.id,
        from = previous.as_str(),
        to = band.as_str(),
        morale = unit.morale(),
        "morale.band_changed"
    );
    let report = reports::pasum(unit, band.as_str(), now);
    ctx.effects.broadcast(Some(unit.id), &unit.side, Message::Pasum(report));
}

fn communications(unit: &mut Unit, ctx: &mut TaskContext<'_>) {
    if unit.is_transient() {
        return;
    }
    let now = ctx.now();
    let interval = SimDuration::from_hours(unit.staff.sop.sitrep_hours);
    let due = *unit.staff.next_sitrep.get_or_insert(now + interval);
    if !unit.staff.sitrep_requested && now < due {
        return;
    }
    unit.staff.sitrep_requested = false;
    unit.staff.next_sitrep = Some(now + interval);
    if let Some(hq) = unit.commander() {
        let report = reports::sitrep(unit, now);
        ctx.effects.send(unit.id, hq, Message::Sitrep(report));
    }
}

/// Supply store projected at `at` from the planned task list, idle
/// consumption outside it, and pending SUPREQs due by then.
fn projected_supply(
    unit: &Unit,
    tasks: &[Task],
    now: SimTime,
    at: SimTime,
    balance: &BalanceConfig,
) -> SupplyPackage {
    let mut store = *unit.supply();
    let mut covered = 0.0;
    for task in tasks.iter().filter(|t| !t.is_finished()) {
        let (Some(begin), Some(end)) = (task.planned_begin, task.planned_end) else {
            continue;
        };
        let (from, to) = (begin.max(now), end.min(at));
        if to <= from {
            continue;
        }
        let overlap = (to - from).hours();
        let span = (end - begin).hours();
        let fraction = if span > 0.0 { overlap / span } else { 1.0 };
        store = store - task.required_supply * fraction;
        covered += overlap;
    }
    let idle = ((at - now).hours() - covered).max(0.0);
    store = store - unit.expenditure(&[IDLE], idle, balance);
    for request in &unit.staff.pending_supreqs {
        if request.eta.is_some_and(|eta| eta <= at) {
            store = store + request.commodity;
        }
    }
    store.clamped_non_negative()
}

pub fn cargo_at(unit: &Unit, tasks: &[Task], now: SimTime, at: SimTime, balance: &BalanceConfig) -> f64 {
    projected_supply(unit, tasks, now, at, balance).level_of(&unit.capacity)
}

/// First hour-aligned time at which the projected cargo level drops under
/// `level`.
pub fn time_at_cargo(
    unit: &Unit,
    tasks: &[Task],
    level: f64,
    now: SimTime,
    balance: &BalanceConfig,
) -> Option<SimTime> {
    if unit.capacity.total() <= 0.0 {
        return None;
    }
    let last = tasks
        .iter()
        .filter_map(|t| t.planned_end)
        .max()
        .unwrap_or(now)
        .max(now);
    let horizon = last + SimDuration::from_hours(PROJECTION_HORIZON_HOURS);
    let step = SimDuration::from_hours(1.0);
    let mut at = now;
    while at <= horizon {
        if cargo_at(unit, tasks, now, at, balance) < level {
            return Some(at);
        }
        at += step;
    }
    None
}

/// Where the plan puts the unit at `at`, interpolating inside the task
/// running then.
pub fn position_at(unit: &Unit, tasks: &[Task], at: SimTime) -> Point {
    let mut position = unit.point();
    for task in tasks.iter().filter(|t| !t.is_finished()) {
        let (Some(begin), Some(end), Some(destination)) =
            (task.planned_begin, task.planned_end, task.destination)
        else {
            continue;
        };
        if at >= end {
            position = destination;
            continue;
        }
        if at > begin && end > begin {
            let t = (at - begin).hours() / (end - begin).hours();
            return position.lerp(destination, t);
        }
        break;
    }
    position
}

/// Rubberband around a unit's footprint and every subordinate's.
pub fn solve_footprint(oob: &Oob, id: UnitId) -> Option<Polygon> {
    let unit = oob.get(id)?;
    let mut points: Vec<Point> = unit.footprint().vertices().to_vec();
    for sub in oob.view().all_subordinates(id) {
        if let Some(sub) = oob.get(sub) {
            if !sub.is_transient() && !sub.delete_me {
                points.extend_from_slice(sub.footprint().vertices());
            }
        }
    }
    if points.len() < 3 {
        return None;
    }
    Some(rubberband(&points))
}

/// Refresh the echelon footprint of every unit with subordinates.
pub fn solve_echelon_footprints(oob: &mut Oob) {
    let updates: Vec<(UnitId, Option<Polygon>)> = oob
        .iter()
        .filter(|u| !u.subordinates().is_empty())
        .map(|u| (u.id, solve_footprint(oob, u.id)))
        .collect();
    for (id, footprint) in updates {
        if let Some(unit) = oob.get_mut(id) {
            unit.echelon_footprint = footprint;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intelligence::{ContactField, ContactStatus};
    use crate::messages::{Recipient, SupplyRequestKind};
    use crate::position::PositionDescriptor;
    use crate::tasks::test_support::Harness;
    use crate::tasks::Redeploy;
    use crate::unit::Stance;
    use sim_runtime::SupplyClass;

    fn team(id: u64, side: &str, at: Point) -> Unit {
        Unit::new(UnitId(id), format!("team {id}"), side)
            .with_personnel("rifleman", 4)
            .at(at, 0.1)
            .with_stance(Stance::DeliberateDefense)
    }

    fn envelope(recipient: UnitId, message: Message) -> Envelope {
        Envelope {
            id: 1,
            sender: None,
            recipient,
            sent: SimTime(0),
            c3_level: 1.0,
            attempts: 0,
            message,
        }
    }

    fn redeploy_order(stance: Stance) -> Opord {
        Opord::new(vec![Task::new(TaskKind::Redeploy(Redeploy::new(stance)))], SimTime(0))
    }

    #[test]
    fn an_order_is_processed_and_stepped_to_completion() {
        let mut harness = Harness::new();
        let mut unit = team(1, "blue", Point::new(10.0, 10.0));
        unit.staff
            .inbox
            .push_back(envelope(unit.id, Message::Opord(Box::new(redeploy_order(Stance::Transit)))));
        harness.with(|ctx| staffwork(&mut unit, ctx));
        let opord = unit.staff.opord.as_ref().unwrap();
        assert_eq!(opord.received, Some(SimTime(0)));
        assert_eq!(opord.execution.h_hour, Some(SimTime(0)));
        assert!(opord.tasks()[0].planned_end.is_some());
        assert_eq!(harness.effects.counters.messages_delivered, 1);

        for _ in 0..12 {
            harness.tick();
            unit.activity.clear();
            harness.with(|ctx| step_unit(&mut unit, ctx));
        }
        assert_eq!(unit.stance(), Stance::Transit);
        assert_eq!(unit.readiness(), 0.0);
        let opord = unit.staff.opord.as_ref().unwrap();
        assert!(opord.is_complete());
        assert!(opord.tasks()[0].end.is_some());
    }

    #[test]
    fn cancelling_a_started_task_ends_it_once() {
        let mut harness = Harness::new();
        let mut unit = team(1, "blue", Point::new(10.0, 10.0));
        harness.with(|ctx| process_opord(&mut unit, redeploy_order(Stance::Transit), ctx));
        for _ in 0..3 {
            harness.tick();
            harness.with(|ctx| step_unit(&mut unit, ctx));
        }
        let id = unit.staff.opord.as_ref().unwrap().tasks()[0].id;
        harness.with(|ctx| cancel_task(&mut unit, id, ctx)).unwrap();
        let task = &unit.staff.opord.as_ref().unwrap().tasks()[0];
        assert_eq!(task.state, crate::tasks::TaskState::Cancelled);
        assert!(task.end.is_some());
        assert_eq!(unit.stance(), Stance::DeliberateDefense);
        assert_eq!(unit.readiness(), 0.0);

        let err = harness.with(|ctx| cancel_task(&mut unit, TaskId(999), ctx)).unwrap_err();
        assert!(matches!(err, TaskError::UnknownTask(TaskId(999))));
    }

    #[test]
    fn an_unstarted_task_is_dropped_when_cancelled() {
        let mut harness = Harness::new();
        let mut unit = team(1, "blue", Point::new(10.0, 10.0));
        let mut order = redeploy_order(Stance::Transit);
        order.execution.maneuver_tasks.push(Task::new(TaskKind::Redeploy(Redeploy::new(
            Stance::HastyDefense,
        ))));
        harness.with(|ctx| process_opord(&mut unit, order, ctx));
        let second = unit.staff.opord.as_ref().unwrap().tasks()[1].id;
        harness.with(|ctx| cancel_task(&mut unit, second, ctx)).unwrap();
        assert_eq!(unit.staff.opord.as_ref().unwrap().tasks().len(), 1);
    }

    #[test]
    fn a_frago_replaces_the_task_list_and_keeps_the_rest() {
        let mut harness = Harness::new();
        let mut unit = team(1, "blue", Point::new(10.0, 10.0));
        let mut order = redeploy_order(Stance::Transit);
        order.mission.statement = "screen the river".into();
        harness.with(|ctx| process_opord(&mut unit, order, ctx));
        harness.tick();
        harness.with(|ctx| step_unit(&mut unit, ctx));

        let mut frago = redeploy_order(Stance::HastyDefense);
        frago.frago = true;
        frago.command_signal.weapons_free = Some(true);
        harness.with(|ctx| process_opord(&mut unit, frago, ctx));
        let opord = unit.staff.opord.as_ref().unwrap();
        assert_eq!(opord.mission.statement, "screen the river");
        assert_eq!(opord.tasks().len(), 1);
        assert_eq!(
            opord.tasks()[0].kind,
            TaskKind::Redeploy(Redeploy::new(Stance::HastyDefense))
        );
        assert!(unit.staff.sop.weapons_free);
    }

    #[test]
    fn fresh_direct_contacts_go_up_once_as_a_cntrep() {
        let mut harness = Harness::new();
        harness.oob.insert(team(1, "blue", Point::new(0.0, 0.0))).unwrap();
        let mut unit = team(2, "blue", Point::new(5.0, 5.0));
        unit.hq = Some(UnitId(1));
        let mut contact = Contact::new(UnitId(9), "red:scouts");
        contact.status = ContactStatus::Direct;
        contact.last_seen = Some(SimTime(0));
        unit.contacts.insert(contact.key.clone(), contact);

        harness.with(|ctx| staffwork(&mut unit, ctx));
        harness.with(|ctx| staffwork(&mut unit, ctx));
        let cntreps: Vec<_> = harness
            .effects
            .outbox
            .iter()
            .filter(|o| matches!(o.message, Message::Cntrep(_)))
            .collect();
        assert_eq!(cntreps.len(), 1);
        let Message::Cntrep(report) = &cntreps[0].message else {
            unreachable!()
        };
        assert_eq!(report.contacts[0].status, ContactStatus::Reported);
    }

    #[test]
    fn received_reports_merge_contacts_except_our_own() {
        let mut unit = team(2, "blue", Point::new(5.0, 5.0));
        let mut other = Contact::new(UnitId(9), "red:scouts");
        other.status = ContactStatus::Direct;
        other.rating = 3;
        let own = Contact::new(UnitId(2), unit.contact_key());
        let report = Report {
            from: UnitId(1),
            issued: SimTime(0),
            contacts: vec![other, own],
            body: serde_json::Value::Null,
        };
        process_report(&mut unit, &report);
        assert_eq!(unit.contacts.len(), 1);
        assert_eq!(unit.contacts["red:scouts"].status, ContactStatus::Reported);
    }

    #[test]
    fn a_heavy_supreq_is_split_into_several_loads() {
        let mut harness = Harness::new();
        let capacity = SupplyPackage::single(SupplyClass::I, 40.0);
        harness
            .oob
            .insert(team(1, "blue", Point::new(5.0, 5.0)).with_personnel("rifleman", 600))
            .unwrap();
        let mut css = Unit::new(UnitId(2), "css", "blue")
            .with_kind(UnitKind::Css)
            .with_vehicles("cargo_truck", 1)
            .at(Point::new(45.0, 5.0), 0.5)
            .with_supply(capacity * 10.0, 1.0);
        css.models.logistics.css = true;
        let request = SupplyRequest {
            uid: 4,
            unit: UnitId(1),
            kind: SupplyRequestKind::Normal,
            commodity: capacity,
            dp: Point::new(5.0, 5.0),
            css: UnitId(2),
            route: Vec::new(),
            eta: None,
            issued: SimTime(0),
        };
        harness.with(|ctx| process_supreq(&mut css, request, ctx));
        assert!(css.staff.css_queue.len() > 1);
        let total: f64 = css.staff.css_queue.iter().map(|r| r.commodity.total()).sum();
        assert!((total - 40.0).abs() < 1e-9);

        let queued = css.staff.css_queue.len();
        harness.with(|ctx| logistics(&mut css, ctx));
        let limit = harness.balance.css.max_dispatch_per_pulse;
        assert_eq!(css.staff.background.len(), limit.min(queued));
        assert!(css.staff.background.iter().all(|t| t.concurrent));
    }

    #[test]
    fn weapons_free_units_ask_for_an_engagement_with_overlapping_enemies() {
        let mut harness = Harness::new();
        harness.oob.insert(team(2, "red", Point::new(10.05, 10.0))).unwrap();
        let mut unit = team(1, "blue", Point::new(10.0, 10.0));
        let mut contact = Contact::new(UnitId(2), "red:team 2");
        contact.status = ContactStatus::Direct;
        contact.location = Some(PositionDescriptor::at(Point::new(10.05, 10.0), 0.1));
        contact
            .fields
            .insert(ContactField::Side, serde_json::json!("red"));
        unit.contacts.insert(contact.key.clone(), contact);

        harness.with(|ctx| operations(&mut unit, ctx));
        assert!(harness.effects.engagement_requests.is_empty());

        unit.staff.sop.weapons_free = true;
        harness.with(|ctx| operations(&mut unit, ctx));
        assert_eq!(harness.effects.engagement_requests, vec![(UnitId(1), UnitId(2))]);
    }

    #[test]
    fn sitreps_follow_the_sop_schedule() {
        let mut harness = Harness::new();
        harness.oob.insert(team(1, "blue", Point::new(0.0, 0.0))).unwrap();
        let mut unit = team(2, "blue", Point::new(5.0, 5.0));
        unit.hq = Some(UnitId(1));
        unit.staff.sop.sitrep_hours = 1.0;
        let count = |h: &Harness| {
            h.effects
                .outbox
                .iter()
                .filter(|o| matches!(o.message, Message::Sitrep(_)))
                .count()
        };
        for _ in 0..12 {
            harness.with(|ctx| communications(&mut unit, ctx));
            harness.tick();
        }
        assert_eq!(count(&harness), 1);
        unit.staff.sitrep_requested = true;
        harness.with(|ctx| communications(&mut unit, ctx));
        assert_eq!(count(&harness), 2);
    }

    #[test]
    fn public_affairs_announces_morale_band_changes_to_the_side() {
        let mut harness = Harness::new();
        let mut unit = team(1, "blue", Point::new(5.0, 5.0));
        let pasums = |h: &Harness| -> Vec<(Recipient, String)> {
            h.effects
                .outbox
                .iter()
                .filter_map(|o| match &o.message {
                    Message::Pasum(report) => Some((
                        o.recipient.clone(),
                        report.body["band"].as_str().unwrap_or_default().to_string(),
                    )),
                    _ => None,
                })
                .collect()
        };

        harness.with(|ctx| public_affairs(&mut unit, ctx));
        assert_eq!(unit.staff.morale_band, Some(MoraleBand::Steady));
        assert!(pasums(&harness).is_empty());

        unit.set_morale(0.5);
        harness.with(|ctx| public_affairs(&mut unit, ctx));
        harness.with(|ctx| public_affairs(&mut unit, ctx));
        assert_eq!(pasums(&harness), vec![(Recipient::Side("blue".into()), "shaken".to_string())]);

        unit.set_morale(0.1);
        harness.with(|ctx| staffwork(&mut unit, ctx));
        let sent = pasums(&harness);
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1].1, "broken");
        assert_eq!(harness.effects.outbox.last().map(|o| o.sender), Some(Some(UnitId(1))));
    }

    #[test]
    fn projections_follow_the_planned_tasks() {
        let harness = Harness::new();
        let capacity = SupplyPackage::single(SupplyClass::Water, 10.0);
        let mut unit = team(1, "blue", Point::new(10.0, 10.0)).with_supply(capacity, 1.0);
        unit.models.logistics.consumption.insert(
            IDLE.to_string(),
            SupplyPackage::single(SupplyClass::Water, 1.0),
        );
        let mut task = Task::new(TaskKind::Redeploy(Redeploy::new(Stance::Transit)));
        task.planned_begin = Some(SimTime(0));
        task.planned_end = Some(SimTime(3_600));
        task.destination = Some(Point::new(12.0, 10.0));
        let tasks = vec![task];

        let level = cargo_at(&unit, &tasks, SimTime(0), SimTime(3 * 3_600), &harness.balance);
        assert!(level < 1.0);
        let when = time_at_cargo(&unit, &tasks, 0.5, SimTime(0), &harness.balance).unwrap();
        assert!(when > SimTime(0));
        assert!(cargo_at(&unit, &tasks, SimTime(0), when, &harness.balance) < 0.5);

        let midway = position_at(&unit, &tasks, SimTime(1_800));
        assert!(midway.approx_eq(Point::new(11.0, 10.0), 1e-9));
        assert_eq!(position_at(&unit, &tasks, SimTime(7_200)), Point::new(12.0, 10.0));
    }

    #[test]
    fn echelon_footprints_cover_every_subordinate() {
        let mut oob = Oob::default();
        oob.insert(team(1, "blue", Point::new(0.0, 0.0))).unwrap();
        oob.insert(team(2, "blue", Point::new(4.0, 0.0))).unwrap();
        oob.insert(team(3, "blue", Point::new(0.0, 4.0))).unwrap();
        oob.set_hq(UnitId(2), Some(UnitId(1))).unwrap();
        oob.set_hq(UnitId(3), Some(UnitId(2))).unwrap();
        solve_echelon_footprints(&mut oob);
        let hull = oob.get(UnitId(1)).unwrap().echelon_footprint.clone().unwrap();
        for p in [Point::new(0.0, 0.0), Point::new(4.0, 0.0), Point::new(0.0, 4.0)] {
            assert!(hull.point_inside(p));
        }
        assert!(oob.get(UnitId(3)).unwrap().echelon_footprint.is_none());
    }
}
