//! Flujo de trabajo por consulta:
//!
//!   Validated → Routed → SpecialistProcessing → Evaluated → Completed
//!
//! Cualquier fallo inesperado lleva a `ErrorFallback`, que conserva el camino
//! parcial y devuelve un mensaje legible en lugar de propagar el error.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use futures::future::join_all;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::agents::{Specialist, Supervisor};
use crate::models::{Domain, Query, QueryResult, Route, RoutingDecision, SpecialistResponse};

pub const ROUTING_STEP: &str = "Supervisor (Routing)";
pub const EVALUATION_STEP: &str = "Supervisor (Evaluation)";

pub const CANNOT_CLASSIFY_MESSAGE: &str = "\
I'm not sure how to help with that query.

I specialize in IT and Finance support. Here are some examples of what I can help with:

IT Support:
- Password resets and account issues
- Computer and network troubleshooting
- Software installation and updates
- Email configuration problems
- Security-related questions

Finance Support:
- Expense report submissions
- Budget and payment processes
- Financial policies and procedures
- Vendor payments and approvals
- Accounting questions

Try asking something like:
- \"How do I reset my password?\"
- \"My computer won't start - what should I do?\"
- \"How do I submit an expense report?\"
- \"What's the budget approval process?\"

Please rephrase your question to be more specific about whether it's an IT or Finance issue.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowState {
    Validated,
    Routed,
    SpecialistProcessing,
    Evaluated,
    Completed,
    ErrorFallback,
}

/// Estado mutable de una consulta; pertenece en exclusiva a su petición.
#[derive(Debug)]
pub struct ProcessingState {
    pub query: Query,
    pub state: WorkflowState,
    pub routing: Option<RoutingDecision>,
    pub specialist_responses: Vec<SpecialistResponse>,
    pub processing_path: Vec<String>,
    pub final_response: String,
    pub evaluated: bool,
    pub success: bool,
    pub error: Option<String>,
}

impl ProcessingState {
    pub fn new(query: Query) -> Self {
        Self {
            query,
            state: WorkflowState::Validated,
            routing: None,
            specialist_responses: Vec::new(),
            processing_path: Vec::new(),
            final_response: String::new(),
            evaluated: false,
            success: false,
            error: None,
        }
    }

    fn transition(&mut self, next: WorkflowState) {
        debug!("Estado {:?} → {:?}", self.state, next);
        self.state = next;
    }

    fn into_result(self, request_id: String) -> QueryResult {
        QueryResult {
            request_id,
            query: self.query.text,
            response_text: self.final_response,
            success: self.success,
            routing_decision: self.routing.map(|r| r.route),
            specialist_agents_used: self
                .specialist_responses
                .iter()
                .map(|r| r.agent_name.clone())
                .collect(),
            tools_used: self
                .specialist_responses
                .iter()
                .map(|r| r.tool_calls_used)
                .sum(),
            evaluated: self.evaluated,
            total_processing_steps: self.processing_path.len(),
            processing_path: self.processing_path,
            error: self.error,
        }
    }
}

pub struct Orchestrator {
    supervisor: Supervisor,
    specialists: HashMap<Domain, Arc<dyn Specialist>>,
}

impl Orchestrator {
    pub fn new(supervisor: Supervisor, specialists: Vec<Arc<dyn Specialist>>) -> Self {
        let specialists = specialists
            .into_iter()
            .map(|s| (s.domain(), s))
            .collect();
        Self {
            supervisor,
            specialists,
        }
    }

    /// Ejecuta el flujo completo. Siempre devuelve un payload bien formado.
    pub async fn run(&self, query: Query) -> QueryResult {
        let request_id = Uuid::new_v4().to_string();
        let mut state = ProcessingState::new(query);

        if let Err(e) = self.advance(&mut state).await {
            error!("Flujo {request_id} en ErrorFallback: {e:#}");
            state.transition(WorkflowState::ErrorFallback);
            state.success = false;
            state.final_response = format!(
                "I apologize, but I encountered an issue: {e}. Please try again or contact support if the problem persists."
            );
            state.error = Some(e.to_string());
        }

        info!(
            "Consulta {request_id} terminada: success={} pasos={}",
            state.success,
            state.processing_path.len()
        );
        state.into_result(request_id)
    }

    async fn advance(&self, state: &mut ProcessingState) -> Result<()> {
        // Validated → Routed
        let decision = self.supervisor.route(&state.query).await;
        state.processing_path.push(ROUTING_STEP.to_string());
        let route = decision.route;
        let routing_error = decision.error.clone();
        state.routing = Some(decision);
        state.transition(WorkflowState::Routed);

        if route == Route::Unclear {
            info!("Consulta no clasificable; respuesta de ayuda");
            state.final_response = CANNOT_CLASSIFY_MESSAGE.to_string();
            state.success = false;
            state.error = routing_error;
            state.transition(WorkflowState::Completed);
            return Ok(());
        }

        // Routed → SpecialistProcessing
        state.transition(WorkflowState::SpecialistProcessing);
        let responses = self.dispatch(route, &state.query).await?;
        for response in responses {
            state.processing_path.push(response.agent_name.clone());
            state.specialist_responses.push(response);
        }

        // SpecialistProcessing → Evaluated
        let (text, evaluated) = self
            .supervisor
            .evaluate(&state.query, &state.specialist_responses)
            .await;
        state.processing_path.push(EVALUATION_STEP.to_string());
        state.final_response = text;
        state.evaluated = evaluated;
        state.transition(WorkflowState::Evaluated);

        // Evaluated → Completed
        let failed: Vec<&str> = state
            .specialist_responses
            .iter()
            .filter(|r| !r.success)
            .map(|r| r.agent_name.as_str())
            .collect();
        state.success = evaluated && failed.is_empty();
        state.error = if !failed.is_empty() {
            Some(format!("{} could not complete the request", failed.join(" and ")))
        } else if !evaluated {
            Some("Supervisor evaluation failed; returning the specialist draft unrefined".to_string())
        } else {
            None
        };
        if !state.success {
            warn!("Consulta resuelta en modo degradado: {:?}", state.error);
        }
        state.transition(WorkflowState::Completed);
        Ok(())
    }

    /// Lanza los especialistas de la ruta como tareas independientes y espera a todos.
    async fn dispatch(&self, route: Route, query: &Query) -> Result<Vec<SpecialistResponse>> {
        let mut handles = Vec::new();
        for domain in route.domains() {
            let specialist = self
                .specialists
                .get(domain)
                .cloned()
                .ok_or_else(|| anyhow!("no specialist is registered for {domain}"))?;
            let query = query.clone();
            handles.push(tokio::spawn(async move { specialist.handle(&query).await }));
        }

        let mut responses = Vec::with_capacity(handles.len());
        for joined in join_all(handles).await {
            let response = joined.map_err(|e| anyhow!("specialist task failed: {e}"))?;
            responses.push(response);
        }
        Ok(responses)
    }
}
