//! The create-order saga.
//!
//! | step | owner | compensable |
//! |---|---|---|
//! | `create_order` | order | yes |
//! | `verify_customer` | customer | no |
//! | `create_ticket` | kitchen | yes |
//! | `authorize_card` | accounting | no |
//!
//! Request payloads are derived from the saga [`Input`]; compensation
//! payloads reference what the step's own success reply returned.

use saga::{
    ActionType, EventData, Execution, INPUT_KEY, Result, SagaError, StepDefinition, Workflow,
    state_key,
};
use serde::{Deserialize, Serialize};

pub const NAME: &str = "create_order";
pub const REPLY_DESTINATION: &str = "saga.create_order.v1.response";

pub const CREATE_ORDER: &str = "create_order";
pub const VERIFY_CUSTOMER: &str = "verify_customer";
pub const CREATE_TICKET: &str = "create_ticket";
pub const AUTHORIZE_CARD: &str = "authorize_card";

/// Saga input as posted by the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Input {
    pub customer_id: String,
    /// Total in minor units.
    pub amount: i64,
    pub currency_code: String,
    #[serde(default)]
    pub card: Option<String>,
    #[serde(default)]
    pub items: Vec<Item>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    pub quantity: u32,
    pub unit_price: i64,
}

/// Success reply of the order service.
#[derive(Debug, Deserialize)]
pub struct OrderCreated {
    pub order_id: String,
}

/// Success reply of the kitchen service.
#[derive(Debug, Deserialize)]
pub struct TicketCreated {
    pub ticket_id: String,
}

#[derive(Serialize)]
struct CreateOrderRequest<'a> {
    customer_id: &'a str,
    amount: i64,
    currency_code: &'a str,
    items: &'a [Item],
}

#[derive(Serialize)]
struct CancelOrderRequest<'a> {
    order_id: &'a str,
}

#[derive(Serialize)]
struct VerifyCustomerRequest<'a> {
    customer_id: &'a str,
}

#[derive(Serialize)]
struct CreateTicketRequest<'a> {
    order_id: &'a str,
    customer_id: &'a str,
    amount: i64,
    currency_code: &'a str,
    items: &'a [Item],
}

#[derive(Serialize)]
struct CancelTicketRequest<'a> {
    ticket_id: &'a str,
}

#[derive(Serialize)]
struct AuthorizeCardRequest<'a> {
    card: &'a str,
    amount: i64,
    currency_code: &'a str,
}

/// Builds the create-order workflow.
pub fn workflow() -> Result<Workflow> {
    Workflow::builder(NAME)
        .reply_destination(REPLY_DESTINATION)
        .step(StepDefinition::new(CREATE_ORDER, "order", create_order_payload).compensable())
        .step(StepDefinition::new(
            VERIFY_CUSTOMER,
            "customer",
            verify_customer_payload,
        ))
        .step(StepDefinition::new(CREATE_TICKET, "kitchen", create_ticket_payload).compensable())
        .step(StepDefinition::new(
            AUTHORIZE_CARD,
            "accounting",
            authorize_card_payload,
        ))
        .build()
}

fn create_order_payload(execution: &Execution, action: ActionType) -> Result<EventData> {
    match action {
        ActionType::Request => {
            let input: Input = execution.read(INPUT_KEY)?;
            to_event_data(
                CREATE_ORDER,
                &CreateOrderRequest {
                    customer_id: &input.customer_id,
                    amount: input.amount,
                    currency_code: &input.currency_code,
                    items: &input.items,
                },
            )
        }
        ActionType::CompensationRequest => {
            let created: OrderCreated =
                execution.read(&state_key(CREATE_ORDER, ActionType::Success))?;
            to_event_data(
                CREATE_ORDER,
                &CancelOrderRequest {
                    order_id: &created.order_id,
                },
            )
        }
        _ => Ok(EventData::new()),
    }
}

fn verify_customer_payload(execution: &Execution, action: ActionType) -> Result<EventData> {
    if !action.is_request() {
        return Ok(EventData::new());
    }
    let input: Input = execution.read(INPUT_KEY)?;
    to_event_data(
        VERIFY_CUSTOMER,
        &VerifyCustomerRequest {
            customer_id: &input.customer_id,
        },
    )
}

fn create_ticket_payload(execution: &Execution, action: ActionType) -> Result<EventData> {
    match action {
        ActionType::Request => {
            let input: Input = execution.read(INPUT_KEY)?;
            let order: OrderCreated =
                execution.read(&state_key(CREATE_ORDER, ActionType::Success))?;
            to_event_data(
                CREATE_TICKET,
                &CreateTicketRequest {
                    order_id: &order.order_id,
                    customer_id: &input.customer_id,
                    amount: input.amount,
                    currency_code: &input.currency_code,
                    items: &input.items,
                },
            )
        }
        ActionType::CompensationRequest => {
            let ticket: TicketCreated =
                execution.read(&state_key(CREATE_TICKET, ActionType::Success))?;
            to_event_data(
                CREATE_TICKET,
                &CancelTicketRequest {
                    ticket_id: &ticket.ticket_id,
                },
            )
        }
        _ => Ok(EventData::new()),
    }
}

fn authorize_card_payload(execution: &Execution, action: ActionType) -> Result<EventData> {
    if !action.is_request() {
        return Ok(EventData::new());
    }
    let input: Input = execution.read(INPUT_KEY)?;
    let card = input
        .card
        .as_deref()
        .ok_or_else(|| SagaError::payload_build(AUTHORIZE_CARD, "input has no card"))?;
    to_event_data(
        AUTHORIZE_CARD,
        &AuthorizeCardRequest {
            card,
            amount: input.amount,
            currency_code: &input.currency_code,
        },
    )
}

fn to_event_data<T: Serialize>(step: &str, payload: &T) -> Result<EventData> {
    match serde_json::to_value(payload)? {
        serde_json::Value::Object(map) => Ok(map),
        other => Err(SagaError::payload_build(
            step,
            format!("payload is not a JSON object: {other}"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use saga::Transition;
    use serde_json::json;
    use std::sync::Arc;

    fn input() -> serde_json::Value {
        json!({
            "customer_id": "c-1",
            "amount": 2500,
            "currency_code": "EUR",
            "card": "4111111111111111",
            "items": [{"id": "sku-1", "quantity": 2, "unit_price": 1250}]
        })
    }

    fn execution_with(state: &[(&str, serde_json::Value)]) -> Execution {
        let mut execution = Execution::new(Arc::new(workflow().unwrap()));
        for (key, value) in state {
            execution.set_state(*key, value).unwrap();
        }
        execution
    }

    fn build(step: &str, execution: &Execution, action: ActionType) -> Result<EventData> {
        let workflow = Arc::clone(execution.workflow());
        let step = workflow.steps().get_step(step).unwrap();
        step.build_payload(execution, action)
    }

    #[test]
    fn test_topology() {
        let workflow = workflow().unwrap();
        let steps: Vec<(&str, &str, bool)> = workflow
            .steps()
            .iter()
            .map(|s| (s.name(), s.owner_service(), s.is_compensable()))
            .collect();

        assert_eq!(workflow.name(), "create_order");
        assert_eq!(workflow.reply_destination(), "saga.create_order.v1.response");
        assert_eq!(
            steps,
            vec![
                ("create_order", "order", true),
                ("verify_customer", "customer", false),
                ("create_ticket", "kitchen", true),
                ("authorize_card", "accounting", false),
            ]
        );
    }

    #[test]
    fn test_card_declined_compensates_ticket_then_order() {
        let workflow = workflow().unwrap();
        let failed = saga::EventType::new(NAME, AUTHORIZE_CARD, ActionType::Failure);

        match workflow.next_step(&failed).unwrap() {
            Transition::Continue { step, action } => {
                assert_eq!(step.name(), CREATE_TICKET);
                assert_eq!(action, ActionType::CompensationRequest);
            }
            other => panic!("unexpected transition {other:?}"),
        }

        let compensated = saga::EventType::new(NAME, CREATE_TICKET, ActionType::Compensated);
        match workflow.next_step(&compensated).unwrap() {
            Transition::Continue { step, .. } => assert_eq!(step.name(), CREATE_ORDER),
            other => panic!("unexpected transition {other:?}"),
        }
    }

    #[test]
    fn test_create_order_request() {
        let execution = execution_with(&[(INPUT_KEY, input())]);
        let payload = build(CREATE_ORDER, &execution, ActionType::Request).unwrap();

        assert_eq!(
            serde_json::Value::Object(payload),
            json!({
                "customer_id": "c-1",
                "amount": 2500,
                "currency_code": "EUR",
                "items": [{"id": "sku-1", "quantity": 2, "unit_price": 1250}]
            })
        );
    }

    #[test]
    fn test_create_order_compensation_uses_created_order() {
        let execution = execution_with(&[
            (INPUT_KEY, input()),
            ("create_order.success", json!({"order_id": "o-9"})),
        ]);
        let payload = build(CREATE_ORDER, &execution, ActionType::CompensationRequest).unwrap();
        assert_eq!(payload["order_id"], "o-9");
    }

    #[test]
    fn test_create_order_compensation_without_success_fails() {
        let execution = execution_with(&[(INPUT_KEY, input())]);
        let err = build(CREATE_ORDER, &execution, ActionType::CompensationRequest).unwrap_err();
        assert!(matches!(err, SagaError::StateKeyNotFound(_)));
    }

    #[test]
    fn test_verify_customer_request() {
        let execution = execution_with(&[(INPUT_KEY, input())]);
        let payload = build(VERIFY_CUSTOMER, &execution, ActionType::Request).unwrap();
        assert_eq!(payload["customer_id"], "c-1");
    }

    #[test]
    fn test_create_ticket_request_references_order() {
        let execution = execution_with(&[
            (INPUT_KEY, input()),
            ("create_order.success", json!({"order_id": "o-9"})),
        ]);
        let payload = build(CREATE_TICKET, &execution, ActionType::Request).unwrap();
        assert_eq!(payload["order_id"], "o-9");
        assert_eq!(payload["items"][0]["quantity"], 2);
    }

    #[test]
    fn test_create_ticket_compensation_uses_ticket() {
        let execution = execution_with(&[
            (INPUT_KEY, input()),
            ("create_ticket.success", json!({"ticket_id": "t-3"})),
        ]);
        let payload = build(CREATE_TICKET, &execution, ActionType::CompensationRequest).unwrap();
        assert_eq!(payload["ticket_id"], "t-3");
    }

    #[test]
    fn test_authorize_card_request() {
        let execution = execution_with(&[(INPUT_KEY, input())]);
        let payload = build(AUTHORIZE_CARD, &execution, ActionType::Request).unwrap();
        assert_eq!(payload["card"], "4111111111111111");
        assert_eq!(payload["amount"], 2500);
    }

    #[test]
    fn test_authorize_card_without_card_fails() {
        let mut without_card = input();
        without_card.as_object_mut().unwrap().remove("card");
        let execution = execution_with(&[(INPUT_KEY, without_card)]);

        let err = build(AUTHORIZE_CARD, &execution, ActionType::Request).unwrap_err();
        assert!(matches!(err, SagaError::PayloadBuild { step, .. } if step == AUTHORIZE_CARD));
    }

    #[test]
    fn test_malformed_input_is_a_decode_error() {
        let execution = execution_with(&[(INPUT_KEY, json!({"customer_id": 7}))]);
        let err = build(CREATE_ORDER, &execution, ActionType::Request).unwrap_err();
        assert!(matches!(err, SagaError::StateDecode { .. }));
    }

    #[test]
    fn test_non_request_actions_build_empty_payloads() {
        let execution = execution_with(&[(INPUT_KEY, input())]);
        for step in [VERIFY_CUSTOMER, AUTHORIZE_CARD] {
            let payload = build(step, &execution, ActionType::CompensationRequest).unwrap();
            assert!(payload.is_empty());
        }
    }
}
