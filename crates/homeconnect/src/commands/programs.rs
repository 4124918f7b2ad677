//! Program command handlers.

use tabled::Tabled;

use homeconnect_core::{Item, OptionDefinition, Platform, Program, ProgramDefinition, ProgramSummary};

use crate::cli::{GlobalOpts, ProgramsArgs, ProgramsCommand};
use crate::error::CliError;
use crate::output;

use super::util;

// ── Table rows ──────────────────────────────────────────────────────

#[derive(Tabled)]
struct ProgramRow {
    #[tabled(rename = "Key")]
    key: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Execution")]
    execution: String,
}

impl From<&ProgramSummary> for ProgramRow {
    fn from(p: &ProgramSummary) -> Self {
        Self {
            key: p.key.clone(),
            name: p.name.clone().unwrap_or_default(),
            execution: p.constraints.execution.clone().unwrap_or_default(),
        }
    }
}

fn option_line(option: &OptionDefinition) -> String {
    let c = &option.constraints;
    let mut parts = Vec::new();
    if let Some(kind) = option.kind.as_deref() {
        parts.push(kind.to_owned());
    }
    match (c.min, c.max) {
        (Some(min), Some(max)) => parts.push(format!("{min}..{max}")),
        (Some(min), None) => parts.push(format!(">= {min}")),
        (None, Some(max)) => parts.push(format!("<= {max}")),
        (None, None) => {}
    }
    if let Some(step) = c.stepsize {
        parts.push(format!("step {step}"));
    }
    if let Some(unit) = option.unit.as_deref() {
        parts.push(unit.to_owned());
    }
    if !c.allowedvalues.is_empty() {
        parts.push(c.allowedvalues.join(" | "));
    }
    if let Some(default) = c.default.as_ref() {
        parts.push(format!("default {default}"));
    }
    format!("  {}  {}", option.key, parts.join(", "))
}

fn definition_detail(def: &ProgramDefinition) -> String {
    let mut lines = vec![format!(
        "Program: {}{}",
        def.key,
        def.name
            .as_deref()
            .map_or_else(String::new, |name| format!(" ({name})"))
    )];
    if def.options.is_empty() {
        lines.push("  (no options)".into());
    }
    lines.extend(def.options.iter().map(option_line));
    lines.join("\n")
}

fn program_detail(program: &Program) -> String {
    let mut lines = vec![format!("Program: {}", program.key)];
    lines.extend(
        program
            .options
            .iter()
            .map(|item| format!("  {} = {}", item.key, util::display_value(item))),
    );
    lines.join("\n")
}

fn print_program(program: Option<&Program>, label: &str, global: &GlobalOpts) {
    match program {
        Some(program) => {
            let out = output::render_single(&global.output, program, program_detail, |p| {
                p.key.clone()
            });
            output::print_output(&out, global.quiet);
        }
        None => output::print_done(&format!("No {label} program"), global.quiet),
    }
}

// ── Handler ─────────────────────────────────────────────────────────

pub async fn handle(
    platform: &Platform,
    args: ProgramsArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    match args.command {
        ProgramsCommand::List { ha_id, available } => {
            let appliance = platform.appliance(&ha_id)?;
            let programs = if available {
                appliance.get_available_programs().await?
            } else {
                appliance.get_all_programs().await?
            };
            let out = output::render_list(
                &global.output,
                &programs,
                |p| ProgramRow::from(p),
                |p| p.key.clone(),
            );
            output::print_output(&out, global.quiet);
            Ok(())
        }

        ProgramsCommand::Show { ha_id, program } => {
            let def = platform
                .appliance(&ha_id)?
                .get_available_program(&program)
                .await?;
            let out = output::render_single(&global.output, &def, definition_detail, |d| {
                d.key.clone()
            });
            output::print_output(&out, global.quiet);
            Ok(())
        }

        ProgramsCommand::Selected(args) => {
            let program = platform.appliance(&args.ha_id)?.get_selected_program().await?;
            print_program(program.as_ref(), "selected", global);
            Ok(())
        }

        ProgramsCommand::Active(args) => {
            let program = platform.appliance(&args.ha_id)?.get_active_program().await?;
            print_program(program.as_ref(), "active", global);
            Ok(())
        }

        ProgramsCommand::Select {
            ha_id,
            program,
            options,
        } => {
            let options = util::parse_options(&options)?;
            platform
                .appliance(&ha_id)?
                .set_selected_program(&program, options)
                .await?;
            output::print_done(&format!("Selected {program}"), global.quiet);
            Ok(())
        }

        ProgramsCommand::Start {
            ha_id,
            program,
            options,
        } => {
            let options = util::parse_options(&options)?;
            platform
                .appliance(&ha_id)?
                .start_program(program.as_deref(), options)
                .await?;
            output::print_done("Program started", global.quiet);
            Ok(())
        }

        ProgramsCommand::Stop(args) => {
            platform.appliance(&args.ha_id)?.stop_program().await?;
            output::print_done("Program stopped", global.quiet);
            Ok(())
        }

        ProgramsCommand::Pause(args) => {
            platform.appliance(&args.ha_id)?.pause_program().await?;
            output::print_done("Program paused", global.quiet);
            Ok(())
        }

        ProgramsCommand::Resume(args) => {
            platform.appliance(&args.ha_id)?.resume_program().await?;
            output::print_done("Program resumed", global.quiet);
            Ok(())
        }

        ProgramsCommand::SetOption {
            ha_id,
            key,
            value,
            selected,
        } => {
            let appliance = platform.appliance(&ha_id)?;
            let option = Item::new(key.clone(), util::parse_value(&value));
            if selected {
                appliance.set_selected_program_option(option).await?;
            } else {
                appliance.set_active_program_option(option).await?;
            }
            output::print_done(&format!("{key} set to {value}"), global.quiet);
            Ok(())
        }
    }
}
