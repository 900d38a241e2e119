//! Named, immutable event values handed to the dispatcher
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

pub mod dispatcher;

pub use dispatcher::{DispatchError, EventDispatcher, RunReport};

/// Emitted after a ticket has been stored.
pub const TICKET_CREATED: &str = "ticket/created";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub name: String,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
}

/// Payload of [`TICKET_CREATED`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketCreated {
    pub ticket_id: String,
}

impl Event {
    pub fn new<T: Serialize>(name: &str, data: &T) -> Result<Self, serde_json::Error> {
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            data: serde_json::to_value(data)?,
            timestamp: Utc::now(),
        })
    }

    pub fn ticket_created(ticket_id: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: TICKET_CREATED.to_string(),
            data: serde_json::json!({ "ticketId": ticket_id }),
            timestamp: Utc::now(),
        }
    }

    /// Decode the payload into a typed value.
    pub fn data_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.data.clone())
    }
}
