//! Message envelopes and delivery into staff inboxes.

use std::collections::VecDeque;

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sim_runtime::{Point, SupplyPackage};

use crate::balance_config::BalanceConfig;
use crate::intelligence::Contact;
use crate::oob::Oob;
use crate::opord::Opord;
use crate::resources::{IdAllocator, SimTime};
use crate::unit::{CommandAndControl, UnitId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SupplyRequestKind {
    #[default]
    Normal,
    Emergency,
    Controlled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupplyRequest {
    pub uid: u64,
    pub unit: UnitId,
    pub kind: SupplyRequestKind,
    pub commodity: SupplyPackage,
    /// Drop point.
    pub dp: Point,
    pub css: UnitId,
    #[serde(default)]
    pub route: Vec<Point>,
    #[serde(default)]
    pub eta: Option<SimTime>,
    pub issued: SimTime,
}

/// Contact snapshot plus a free-form body, shared by SITREP, INTSUM and
/// CNTREP.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub from: UnitId,
    pub issued: SimTime,
    #[serde(default)]
    pub contacts: Vec<Contact>,
    #[serde(default)]
    pub body: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    Opord(Box<Opord>),
    Supreq(SupplyRequest),
    Sitrep(Report),
    Intsum(Report),
    Cntrep(Report),
    /// Morale and status broadcast to the unit's side.
    Pasum(Report),
    Codeword { word: String },
}

impl Message {
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Opord(opord) if opord.frago => "frago",
            Message::Opord(_) => "opord",
            Message::Supreq(_) => "supreq",
            Message::Sitrep(_) => "sitrep",
            Message::Intsum(_) => "intsum",
            Message::Cntrep(_) => "cntrep",
            Message::Pasum(_) => "pasum",
            Message::Codeword { .. } => "codeword",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recipient {
    Unit(UnitId),
    /// Every unit of a side.
    Side(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub id: u64,
    /// `None` for orders injected by the driver or a scenario.
    pub sender: Option<UnitId>,
    pub recipient: UnitId,
    pub sent: SimTime,
    /// Probability the message is read on a given attempt.
    pub c3_level: f64,
    #[serde(default)]
    pub attempts: u32,
    pub message: Message,
}

impl Envelope {
    /// Suppression test: a draw above the C3 level defers the message.
    pub fn is_suppressed<R: Rng + ?Sized>(&self, rng: &mut R) -> bool {
        let draw: f64 = rng.gen();
        draw > self.c3_level
    }
}

/// A message waiting for the end of the current phase.
#[derive(Debug, Clone, PartialEq)]
pub struct Outgoing {
    pub sender: Option<UnitId>,
    pub recipient: Recipient,
    pub message: Message,
}

impl Outgoing {
    pub fn to_unit(sender: UnitId, recipient: UnitId, message: Message) -> Self {
        Self {
            sender: Some(sender),
            recipient: Recipient::Unit(recipient),
            message,
        }
    }
}

/// Append every outgoing message to its recipients' inboxes, stamping the
/// C3 level of the path it travels. Returns the number of envelopes queued.
pub fn deliver(
    outbox: Vec<Outgoing>,
    oob: &mut Oob,
    now: SimTime,
    ids: &mut IdAllocator,
    comm_range_km: f64,
    balance: &BalanceConfig,
) -> usize {
    let mut queued = 0;
    for outgoing in outbox {
        let recipients: Vec<UnitId> = match &outgoing.recipient {
            Recipient::Unit(id) => vec![*id],
            Recipient::Side(side) => oob
                .iter()
                .filter(|u| &u.side == side && !u.is_transient())
                .map(|u| u.id)
                .collect(),
        };
        for recipient in recipients {
            let c3_level = match outgoing.sender {
                None => 1.0,
                Some(sender) if sender == recipient => 1.0,
                Some(sender) => path_level(oob, sender, recipient, comm_range_km, balance),
            };
            let Some(unit) = oob.get_mut(recipient) else {
                tracing::debug!(
                    target: "opsim::staff",
                    recipient = %recipient,
                    kind = outgoing.message.kind(),
                    "message.no_recipient"
                );
                continue;
            };
            unit.staff.inbox.push_back(Envelope {
                id: ids.message(),
                sender: outgoing.sender,
                recipient,
                sent: now,
                c3_level,
                attempts: 0,
                message: outgoing.message.clone(),
            });
            queued += 1;
        }
    }
    queued
}

/// C3 along the chain of command, or the sender's own net when the two
/// units share no chain.
fn path_level(
    oob: &Oob,
    sender: UnitId,
    recipient: UnitId,
    comm_range_km: f64,
    balance: &BalanceConfig,
) -> f64 {
    let view = oob.view();
    if view.chain_of_command_to(sender, recipient).first() == Some(&None) {
        return oob
            .get(sender)
            .map(|u| u.c3_level(None, comm_range_km, balance))
            .unwrap_or(0.0);
    }
    view.comm_level_to(sender, recipient, comm_range_km, balance)
}

/// Split `queue` into the messages that get through this pulse and those
/// deferred to the next one.
pub fn screen<R: Rng + ?Sized>(
    queue: VecDeque<Envelope>,
    suppression: bool,
    rng: &mut R,
) -> (Vec<Envelope>, VecDeque<Envelope>) {
    let mut read = Vec::new();
    let mut deferred = VecDeque::new();
    for mut envelope in queue {
        if suppression && envelope.is_suppressed(rng) {
            envelope.attempts += 1;
            deferred.push_back(envelope);
        } else {
            read.push(envelope);
        }
    }
    (read, deferred)
}
