//! Locale selection and localized help output.
//!
//! Help is built from the clap definition of [`Cli`], with headings, command
//! descriptions and argument help replaced by entries from the locale files.

use clap::CommandFactory;
use rust_i18n::t;

use crate::Cli;

/// Supported locales for i18n.
pub(crate) const SUPPORTED_LOCALES: &[&str] = &["en", "vi"];

/// Detect the best matching locale from system settings.
pub(crate) fn detect_locale() -> String {
    let system_locale = sys_locale::get_locale().unwrap_or_else(|| "en".to_string());
    match_locale(&system_locale)
}

/// Map a system or user locale string onto a supported locale.
///
/// - `vi_VN.UTF-8` -> `vi`
/// - `en_US.UTF-8` -> `en`
/// - `C` / `POSIX` / anything unsupported -> `en`
pub(crate) fn match_locale(locale: &str) -> String {
    // Strip encoding suffix, BCP 47 separators
    let locale = locale.split('.').next().unwrap_or(locale).replace('_', "-");

    if SUPPORTED_LOCALES.contains(&locale.as_str()) {
        return locale;
    }

    let lang_code = locale.split('-').next().unwrap_or(&locale).to_lowercase();
    if SUPPORTED_LOCALES.contains(&lang_code.as_str()) {
        lang_code
    } else {
        "en".to_string()
    }
}

/// Build a clap `Command` with fully localized help output.
pub(crate) fn build_localized_command() -> clap::Command {
    // Headings must be 'static; the process prints help once and exits.
    let args_heading: &'static str =
        Box::leak(t!("help.arguments_heading").to_string().into_boxed_str());
    let opts_heading: &'static str =
        Box::leak(t!("help.options_heading").to_string().into_boxed_str());

    let tpl = format!(
        "{{bin}} {{version}}\n\n{{about}}\n\n\
         {usage_h}:\n  {{usage}}\n\n\
         {cmds_h}:\n{{subcommands}}\n\n\
         {opts_h}:\n{{options}}\n\n\
         {{after-help}}\n",
        usage_h = t!("help.usage_heading"),
        cmds_h = t!("help.commands_heading"),
        opts_h = opts_heading,
    );

    let sub_tpl = format!(
        "{{bin}} {{version}}\n\n{{about}}\n\n\
         {usage_h}:\n  {{usage}}\n\n\
         {{all-args}}\n",
        usage_h = t!("help.usage_heading"),
    );

    let heading = move |arg: clap::Arg| {
        let arg = localize_arg(arg);
        if arg.get_short().is_none() && arg.get_long().is_none() {
            arg.help_heading(args_heading)
        } else {
            arg.help_heading(opts_heading)
        }
    };

    Cli::command()
        .help_template(tpl)
        .about(t!("app.about").to_string())
        .after_help(t!("app.after_help").to_string())
        .mut_args(heading)
        .mut_subcommands(move |sub| {
            let about_key = format!("cmd.{}.about", sub.get_name().replace('-', "_"));
            let sub = match localized(&about_key) {
                Some(about) => sub.about(about),
                None => sub,
            };
            sub.help_template(sub_tpl.clone()).mut_args(heading)
        })
}

fn localized(key: &str) -> Option<String> {
    let text = t!(key).to_string();
    // Missing keys come back as the key itself
    (text != key && !text.ends_with(key)).then_some(text)
}

/// Replace an arg's help text with `arg.<id>.help` when the locale has it.
pub(crate) fn localize_arg(arg: clap::Arg) -> clap::Arg {
    let key = format!("arg.{}.help", arg.get_id().as_str());
    match localized(&key) {
        Some(help) => arg.help(help),
        None => arg,
    }
}
