//! Developer console.
//!
//! A small line-oriented loop over a [`GameHost`] for firing lifecycle events
//! by hand, inspecting state, and managing mods and saves.

use anyhow::Result;
use colored::Colorize;
use log::info;
use serde_json::Value;

use crate::dispatch::TriggerReport;
use crate::display::Tone;
use crate::host::GameHost;

#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    Fire { event: String, payload: Value },
    Hooks,
    Mods,
    ToggleMod(String),
    ToggleMods,
    Reload,
    State,
    Saves,
    Save(String),
    Load(String),
    Help,
    Quit,
    Unknown(String),
}

/// Parses a console line. Anything after `fire <event>` is read as a JSON payload.
pub fn parse_console_command(input: &str) -> ConsoleCommand {
    let trimmed = input.trim();
    let words: Vec<&str> = trimmed.split_whitespace().collect();
    match words.as_slice() {
        ["fire" | "trigger", event] => ConsoleCommand::Fire {
            event: (*event).to_string(),
            payload: Value::Null,
        },
        ["fire" | "trigger", event, ..] => {
            let rest = trimmed
                .splitn(3, char::is_whitespace)
                .nth(2)
                .unwrap_or_default()
                .trim();
            match serde_json::from_str(rest) {
                Ok(payload) => ConsoleCommand::Fire {
                    event: (*event).to_string(),
                    payload,
                },
                Err(e) => ConsoleCommand::Unknown(format!("payload is not valid JSON: {e}")),
            }
        },
        ["hooks"] => ConsoleCommand::Hooks,
        ["mods"] => ConsoleCommand::Mods,
        ["toggle", "mods"] | ["toggle-mods"] => ConsoleCommand::ToggleMods,
        ["toggle", id] => ConsoleCommand::ToggleMod((*id).to_string()),
        ["reload"] => ConsoleCommand::Reload,
        ["state" | "status"] => ConsoleCommand::State,
        ["saves"] => ConsoleCommand::Saves,
        ["save", slot] => ConsoleCommand::Save((*slot).to_string()),
        ["load", slot] => ConsoleCommand::Load((*slot).to_string()),
        ["help" | "?"] => ConsoleCommand::Help,
        ["quit" | "exit"] => ConsoleCommand::Quit,
        _ => ConsoleCommand::Unknown(trimmed.to_string()),
    }
}

const HELP: &str = "\
fire <event> [json]   run the hook chain for <event>
hooks                 list bound events and modules
mods                  list packages in the mods directory
toggle <id>           enable or disable one mod and reload
toggle mods           switch the mod system on or off
reload                re-read and re-merge all content
state                 show the current player state
saves                 list save slots
save <slot>           save the game
load <slot>           load a saved game
quit                  leave";

/// Runs the console until `quit` or end of input.
///
/// Command errors are reported to the display and the loop continues.
pub fn run_console(host: &mut GameHost) {
    host.display_mut()
        .write(&"Our Legacy developer console. Type 'help' for commands.".bold().to_string());
    loop {
        let Some(input) = host.display_mut().read_input() else {
            info!("end of input; leaving console");
            break;
        };
        if input.trim().is_empty() {
            continue;
        }
        match parse_console_command(&input) {
            ConsoleCommand::Quit => break,
            command => {
                if let Err(e) = handle(host, command) {
                    host.display_mut().write_toned(&format!("{e:#}"), Tone::Warning);
                }
            },
        }
    }
}

fn handle(host: &mut GameHost, command: ConsoleCommand) -> Result<()> {
    match command {
        ConsoleCommand::Fire { event, payload } => {
            info!("console: firing {event}");
            match host.trigger(&event, payload) {
                Some(report) => {
                    let summary = summarize(&report);
                    host.display_mut().write(&summary);
                },
                None => host
                    .display_mut()
                    .write_toned("scripting is disabled", Tone::Warning),
            }
        },
        ConsoleCommand::Hooks => {
            let lines: Vec<String> = match host.scripting() {
                Some(scripting) => {
                    let registry = scripting.registry();
                    registry
                        .events()
                        .into_iter()
                        .map(|event| {
                            let modules: Vec<String> = registry
                                .bindings_for(event)
                                .into_iter()
                                .map(|b| format!("{}({})", b.module_id, b.priority))
                                .collect();
                            format!("{event}: {}", modules.join(", "))
                        })
                        .collect()
                },
                None => vec!["scripting is disabled".to_string()],
            };
            for line in lines {
                host.display_mut().write(&line);
            }
        },
        ConsoleCommand::Mods => {
            let mods_on = host.settings().mods_enabled;
            let listings = host.list_mods()?;
            host.display_mut()
                .write(&format!("mod system: {}", if mods_on { "on" } else { "off" }));
            if listings.is_empty() {
                host.display_mut().write("no mods installed");
            }
            for listing in listings {
                let id = listing.id.as_deref().unwrap_or(listing.folder.as_str());
                let version = listing.version.as_deref().unwrap_or("?");
                let status = match (&listing.excluded, listing.enabled) {
                    (Some(reason), _) => format!("excluded: {reason}"),
                    (None, true) => "enabled".to_string(),
                    (None, false) => "disabled".to_string(),
                };
                host.display_mut().write(&format!("{id} v{version} [{status}]"));
            }
        },
        ConsoleCommand::ToggleMod(id) => {
            let enabled = host.toggle_mod(&id)?;
            let word = if enabled { "enabled" } else { "disabled" };
            host.display_mut().write(&format!("{id} {word}"));
        },
        ConsoleCommand::ToggleMods => {
            let enabled = host.toggle_mods_system()?;
            let word = if enabled { "on" } else { "off" };
            host.display_mut().write(&format!("mod system {word}"));
        },
        ConsoleCommand::Reload => {
            host.reload_content()?;
            let layers = host.dataset().layers().len();
            host.display_mut().write(&format!("content reloaded ({layers} layers)"));
        },
        ConsoleCommand::State => {
            let text = serde_json::to_string_pretty(&host.state().player)?;
            let area = host.state().location.current_area.clone();
            let generation = host.state().generation;
            host.display_mut()
                .write(&format!("area: {area}, generation: {generation}"));
            for line in text.lines() {
                host.display_mut().write(line);
            }
        },
        ConsoleCommand::Saves => {
            let slots = host.save_slots()?;
            if slots.is_empty() {
                host.display_mut().write("no saves");
            }
            for slot in slots {
                host.display_mut()
                    .write(&format!("{} (v{})", slot.slot, slot.version));
            }
        },
        ConsoleCommand::Save(slot) => {
            host.save_game(&slot)?;
            host.display_mut().write(&format!("saved '{slot}'"));
        },
        ConsoleCommand::Load(slot) => {
            host.load_game(&slot)?;
            host.display_mut().write(&format!("loaded '{slot}'"));
        },
        ConsoleCommand::Help => {
            for line in HELP.lines() {
                host.display_mut().write(line);
            }
        },
        ConsoleCommand::Unknown(text) => {
            host.display_mut()
                .write_toned(&format!("didn't understand '{text}'"), Tone::Warning);
        },
        ConsoleCommand::Quit => {},
    }
    Ok(())
}

fn summarize(report: &TriggerReport) -> String {
    let ran: Vec<String> = report
        .modules
        .iter()
        .map(|m| {
            if m.succeeded() {
                format!("{} +{}", m.module_id, m.applied)
            } else {
                format!("{} failed", m.module_id)
            }
        })
        .collect();
    let mut summary = if ran.is_empty() {
        format!("{}: no modules bound", report.event)
    } else {
        format!("{}: {}", report.event, ran.join(", "))
    };
    if !report.emitted.is_empty() {
        let names: Vec<&str> = report.emitted.iter().map(|e| e.name.as_str()).collect();
        summary.push_str(&format!(" | emitted: {}", names.join(", ")));
    }
    summary
}
