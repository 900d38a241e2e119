use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{collections::HashSet, sync::Arc};
use tracing::info;

use super::{StepContext, Workflow, WorkflowError};
use crate::{
    database::{
        tickets::{Ticket, TicketStore},
        users::normalize_skills,
    },
    events::{Event, TicketCreated, TICKET_CREATED},
    skills::{SkillExtraction, SkillExtractor},
};

pub const WORKFLOW_ID: &str = "ticket-created-workflow";

pub const LOAD_TICKET: &str = "load-ticket";
pub const EXTRACT_REQUIRED_SKILLS: &str = "extract-required-skills";
pub const UPDATE_TICKET_ENRICHMENT: &str = "update-ticket-enrichment";

const STEPS: &[&str] = &[LOAD_TICKET, EXTRACT_REQUIRED_SKILLS, UPDATE_TICKET_ENRICHMENT];

/// Final output of an enrichment run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichmentResult {
    pub enriched: bool,
    pub related_skills: Vec<String>,
    pub helpful_notes: Option<String>,
}

/// Loads the created ticket, extracts required skills from its text and
/// writes them back as `relatedSkills` / `helpfulNotes`.
pub struct TicketEnrichmentWorkflow {
    tickets: Arc<dyn TicketStore>,
    extractor: Arc<SkillExtractor>,
}

impl TicketEnrichmentWorkflow {
    pub fn new(tickets: Arc<dyn TicketStore>, extractor: Arc<SkillExtractor>) -> Self {
        Self { tickets, extractor }
    }
}

/// Normalize extracted skills and drop repeats, keeping first occurrences.
pub fn normalize_related_skills(skills: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    normalize_skills(skills)
        .into_iter()
        .filter(|skill| seen.insert(skill.clone()))
        .collect()
}

#[async_trait]
impl Workflow for TicketEnrichmentWorkflow {
    fn id(&self) -> &str {
        WORKFLOW_ID
    }

    fn trigger(&self) -> &str {
        TICKET_CREATED
    }

    fn steps(&self) -> &[&'static str] {
        STEPS
    }

    async fn execute(
        &self,
        event: &Event,
        steps: &mut StepContext<'_>,
    ) -> Result<Value, WorkflowError> {
        let payload: TicketCreated =
            event
                .data_as()
                .map_err(|source| WorkflowError::InvalidPayload {
                    event: event.name.clone(),
                    source,
                })?;
        let ticket_id = payload.ticket_id.as_str();
        let tickets = self.tickets.as_ref();
        let extractor = self.extractor.as_ref();

        let ticket: Ticket = steps
            .run(LOAD_TICKET, move || async move {
                tickets
                    .find_by_id(ticket_id)
                    .await
                    .map_err(|e| WorkflowError::step_failed(LOAD_TICKET, e))?
                    .ok_or_else(|| WorkflowError::TicketNotFound(ticket_id.to_string()))
            })
            .await?;

        let loaded = &ticket;
        let extraction: SkillExtraction = steps
            .run(EXTRACT_REQUIRED_SKILLS, move || async move {
                Ok(extractor
                    .extract_skills(&loaded.title, &loaded.description)
                    .await)
            })
            .await?;

        let related_skills = normalize_related_skills(&extraction.required_skills);
        let helpful_notes = Some(extraction.notes).filter(|notes| !notes.is_empty());
        let skills_ref = related_skills.as_slice();
        let notes_ref = helpful_notes.as_deref();

        steps
            .run(UPDATE_TICKET_ENRICHMENT, move || async move {
                let updated = tickets
                    .update_enrichment(ticket_id, skills_ref, notes_ref)
                    .await
                    .map_err(|e| WorkflowError::step_failed(UPDATE_TICKET_ENRICHMENT, e))?;
                if !updated {
                    return Err(WorkflowError::TicketNotFound(ticket_id.to_string()));
                }
                Ok(())
            })
            .await?;

        info!(
            run_id = %steps.run_id(),
            ticket_id = %ticket_id,
            skills = ?related_skills,
            "Ticket enriched"
        );

        serde_json::to_value(EnrichmentResult {
            enriched: true,
            related_skills,
            helpful_notes,
        })
        .map_err(|source| WorkflowError::Serialization {
            step: UPDATE_TICKET_ENRICHMENT.to_string(),
            source,
        })
    }
}
