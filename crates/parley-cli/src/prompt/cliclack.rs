use std::io::{self, Write};

use anyhow::Result;
use bat::WrappingMode;
use cliclack::{confirm, input, spinner};
use parley::agent::Suspension;
use parley::models::content::Content;
use parley::models::message::{Message, MessageContent};
use serde_json::Value;

use super::{answer, confirmation, correction, HumanRequest, Input, InputType, Prompt, Theme};

pub struct CliclackPrompt {
    spinner: cliclack::ProgressBar,
    input_mode: InputMode,
    theme: Theme,
}

enum InputMode {
    Singleline,
    Multiline,
}

impl CliclackPrompt {
    pub fn new() -> Self {
        CliclackPrompt {
            spinner: spinner(),
            input_mode: InputMode::Singleline,
            theme: Theme::Dark,
        }
    }

    fn theme_name(&self) -> &'static str {
        match self.theme {
            Theme::Light => "GitHub",
            Theme::Dark => "zenburn",
        }
    }
}

fn pretty_print(printer: &mut bat::PrettyPrinter) {
    if let Err(e) = printer.print() {
        tracing::warn!("Failed to render output: {}", e);
    }
}

fn print_tool_request(content: &str, theme: &str, tool_name: &str) {
    pretty_print(
        bat::PrettyPrinter::new()
            .input(
                bat::Input::from_bytes(content.as_bytes())
                    .name(format!("Tool Request: {}", tool_name)),
            )
            .theme(theme)
            .language("JSON")
            .grid(true)
            .header(true)
            .wrapping_mode(WrappingMode::Character),
    );
}

fn print_tool_response(content: &str, theme: &str, language: &str) {
    pretty_print(
        bat::PrettyPrinter::new()
            .input(bat::Input::from_bytes(content.as_bytes()).name("Tool Response:"))
            .theme(theme)
            .language(language)
            .grid(true)
            .header(true)
            .wrapping_mode(WrappingMode::Character),
    );
}

fn print(content: &str, theme: &str) {
    pretty_print(
        bat::PrettyPrinter::new()
            .input(bat::Input::from_bytes(content.as_bytes()))
            .theme(theme)
            .language("Markdown")
            .wrapping_mode(WrappingMode::Character),
    );
}

/// Structured output is pretty printed as JSON, text as Markdown
fn format_tool_output(output: &[Content]) -> (String, &'static str) {
    match output {
        [Content::Json(json)] => (
            serde_json::to_string_pretty(&json.value).unwrap_or_else(|_| json.value.to_string()),
            "JSON",
        ),
        _ => (
            output
                .iter()
                .map(Content::summary)
                .collect::<Vec<_>>()
                .join("\n"),
            "Markdown",
        ),
    }
}

impl Prompt for CliclackPrompt {
    fn render(&mut self, message: Box<Message>) {
        let theme = self.theme_name();

        for message_content in &message.content {
            match message_content {
                MessageContent::Text(text) => print(text, theme),
                MessageContent::ToolRequest(tool_request) => match &tool_request.tool_call {
                    Ok(call) => {
                        let arguments = serde_json::to_string_pretty(&call.arguments)
                            .unwrap_or_else(|_| call.arguments.to_string());
                        print_tool_request(&arguments, theme, &call.name);
                    }
                    Err(e) => print(&e.to_string(), theme),
                },
                MessageContent::ToolResponse(tool_response) => match &tool_response.tool_result {
                    Ok(output) => {
                        let (formatted, language) = format_tool_output(output);
                        print_tool_response(&formatted, theme, language);
                    }
                    Err(e) => print(&e.to_string(), theme),
                },
            }
        }

        println!();
        if let Err(e) = io::stdout().flush() {
            tracing::warn!("Failed to flush stdout: {}", e);
        }
    }

    fn show_busy(&mut self) {
        self.spinner = spinner();
        self.spinner.start("awaiting reply");
    }

    fn hide_busy(&self) {
        self.spinner.stop("");
    }

    fn get_input(&mut self) -> Result<Input> {
        let mut input = input("Parley: [Help: /?]").placeholder("");
        match self.input_mode {
            InputMode::Multiline => input = input.multiline(),
            InputMode::Singleline => (),
        }
        let message_text: String = input.interact()?;
        let message_text = message_text.trim();

        if message_text.eq_ignore_ascii_case("/exit") || message_text.eq_ignore_ascii_case("/quit")
        {
            Ok(Input::exit())
        } else if message_text.eq_ignore_ascii_case("/m") {
            self.input_mode = InputMode::Multiline;
            self.get_input()
        } else if message_text.eq_ignore_ascii_case("/s") {
            self.input_mode = InputMode::Singleline;
            self.get_input()
        } else if message_text.eq_ignore_ascii_case("/t") {
            self.theme = match self.theme {
                Theme::Light => {
                    println!("Switching to Dark theme");
                    Theme::Dark
                }
                Theme::Dark => {
                    println!("Switching to Light theme");
                    Theme::Light
                }
            };
            self.get_input()
        } else if message_text.eq_ignore_ascii_case("/?") {
            println!("Commands:");
            println!("/exit - Exit the session");
            println!("/m - Switch to multiline input mode");
            println!("/s - Switch to singleline input mode");
            println!("/t - Toggle Light/Dark theme");
            println!("/? - Display this help message");
            println!("Ctrl+C - Abandon the current reply (the thread keeps its last saved state)");
            self.get_input()
        } else if message_text.is_empty() {
            Ok(Input {
                input_type: InputType::AskAgain,
                content: None,
            })
        } else {
            Ok(Input::message(message_text))
        }
    }

    fn ask_human(&mut self, suspension: &Suspension) -> Result<Value> {
        self.hide_busy();

        match HumanRequest::from_suspension(suspension) {
            HumanRequest::Verify { name, birthday } => {
                cliclack::note(
                    "Verification requested",
                    format!("name: {}\nbirthday: {}", name, birthday),
                )?;
                let correct: bool = confirm("Is this correct?").interact()?;
                if correct {
                    Ok(confirmation())
                } else {
                    let name: String = input("Name").placeholder(&name).interact()?;
                    let birthday: String = input("Birthday").placeholder(&birthday).interact()?;
                    Ok(correction(&name, &birthday))
                }
            }
            HumanRequest::Query(query) => {
                cliclack::note(
                    format!("{} needs your help", suspension.tool_name),
                    query,
                )?;
                let text: String = input("Your answer").placeholder("").interact()?;
                Ok(answer(&text))
            }
        }
    }

    fn close(&self) {
        // No cleanup required
    }
}
