use anyhow::Result;
use parley::agent::Suspension;
use parley::models::message::Message;
use serde_json::{json, Value};

pub mod cliclack;

pub trait Prompt {
    fn render(&mut self, message: Box<Message>);
    fn get_input(&mut self) -> Result<Input>;
    /// Put a suspended tool's question to the human and return the resume payload
    fn ask_human(&mut self, suspension: &Suspension) -> Result<Value>;
    fn show_busy(&mut self);
    fn hide_busy(&self);
    fn close(&self);
    fn parley_ready(&self) {
        println!("\n");
        println!("Parley is running! Ask a question, or type /? for help.");
        println!("\n");
    }
}

pub struct Input {
    pub input_type: InputType,
    pub content: Option<String>, // Optional content as sometimes the user may be issuing a command eg. (Exit)
}

impl Input {
    pub fn message<S: Into<String>>(content: S) -> Self {
        Self {
            input_type: InputType::Message,
            content: Some(content.into()),
        }
    }

    pub fn exit() -> Self {
        Self {
            input_type: InputType::Exit,
            content: None,
        }
    }
}

pub enum InputType {
    AskAgain, // Ask the user for input again. Control flow command.
    Message,  // User sent a message
    Exit,     // User wants to exit the session
}

pub enum Theme {
    Light,
    Dark,
}

/// What a suspended tool wants from the human
#[derive(Debug, Clone, PartialEq)]
pub enum HumanRequest {
    /// Confirm or correct a name and birthday
    Verify { name: String, birthday: String },
    /// Answer a free-form question
    Query(String),
}

impl HumanRequest {
    pub fn from_suspension(suspension: &Suspension) -> Self {
        let payload = &suspension.payload;
        let field = |key: &str| payload.get(key).and_then(Value::as_str).map(str::to_string);

        match (field("name"), field("birthday")) {
            (Some(name), Some(birthday)) => HumanRequest::Verify { name, birthday },
            _ => HumanRequest::Query(field("query").unwrap_or_else(|| payload.to_string())),
        }
    }
}

pub fn confirmation() -> Value {
    json!({ "correct": "y" })
}

pub fn correction(name: &str, birthday: &str) -> Value {
    json!({ "correct": "n", "name": name, "birthday": birthday })
}

pub fn answer(text: &str) -> Value {
    json!({ "data": text })
}

/// A JSON object is passed through as is; anything else becomes a plain answer
pub fn parse_payload(text: &str) -> Value {
    match serde_json::from_str::<Value>(text) {
        Ok(value) if value.is_object() => value,
        _ => answer(text),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn suspension(tool_name: &str, payload: Value) -> Suspension {
        Suspension {
            thread_id: "t1".to_string(),
            call_id: "call_1".to_string(),
            tool_name: tool_name.to_string(),
            payload,
        }
    }

    #[test]
    fn test_human_request_kinds() {
        let verify = suspension(
            "human_verification",
            json!({"question": "Is this correct?", "name": "LangGraph", "birthday": "Jan 17, 2024"}),
        );
        assert_eq!(
            HumanRequest::from_suspension(&verify),
            HumanRequest::Verify {
                name: "LangGraph".to_string(),
                birthday: "Jan 17, 2024".to_string(),
            }
        );

        let query = suspension("human_assistance", json!({"query": "Which database?"}));
        assert_eq!(
            HumanRequest::from_suspension(&query),
            HumanRequest::Query("Which database?".to_string())
        );

        let other = suspension("custom", json!({"choice": [1, 2]}));
        assert_eq!(
            HumanRequest::from_suspension(&other),
            HumanRequest::Query("{\"choice\":[1,2]}".to_string())
        );
    }

    #[test]
    fn test_parse_payload() {
        assert_eq!(parse_payload("{\"correct\": \"y\"}"), confirmation());
        assert_eq!(parse_payload("use sqlite"), json!({"data": "use sqlite"}));
        assert_eq!(parse_payload("42"), json!({"data": "42"}));
        assert_eq!(
            correction("LangGraph", "Jan 17, 2024"),
            json!({"correct": "n", "name": "LangGraph", "birthday": "Jan 17, 2024"})
        );
    }
}
