//! # Help Text
//!
//! Help output for the `.help` command, built from the registered command list.

pub const HEADER: &str = "**🤖 Commands**\nUse: `<prefix>command _args_`\n";

pub fn command_line(prefix: &str, name: &str, usage: Option<&str>, description: &str) -> String {
    match usage {
        Some(usage) => format!("* `{prefix}{name} {usage}`: {description}"),
        None => format!("* `{prefix}{name}`: {description}"),
    }
}

pub const ADMIN_SECTION: &str = "\n**🛡️ Admin**";
