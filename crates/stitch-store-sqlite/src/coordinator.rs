//! Executes one [`IngestCommand`] inside a single transaction.

use rusqlite::Transaction;
use stitch_core::ingest::{Applied, IngestCommand, RecordId};

use crate::{Result, events, identity, stitch};

pub fn apply(tx: &Transaction<'_>, command: &IngestCommand, now: &str) -> Result<Applied> {
  match command {
    IngestCommand::Track { event, device_id } => {
      identity::upsert(tx, &event.distinct_id, device_id.as_deref(), now)?;
      let user_id = identity::resolve_user_id(tx, &event.distinct_id)?;
      let id = events::insert(tx, event, user_id.as_deref(), now)?;
      Ok(Applied { record_id: RecordId::Event(id), stitch: None })
    }
    IngestCommand::Identify { event, stitch: request } => {
      let outcome = stitch::stitch(tx, request, now)?;
      let id = events::insert(tx, event, Some(&request.user_id), now)?;
      Ok(Applied { record_id: RecordId::Event(id), stitch: Some(outcome) })
    }
    IngestCommand::Profile { distinct_id, fields } => {
      let id = identity::update_profile(tx, distinct_id, fields, now)?;
      Ok(Applied { record_id: RecordId::Identity(id), stitch: None })
    }
  }
}
