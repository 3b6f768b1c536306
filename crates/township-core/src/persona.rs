//! Helpers over persona documents.
//!
//! A persona is free text with a few labelled lines, for example:
//!
//! ```text
//! Name: Ada
//! Age: 34
//! Lifestyle: Ada wakes up at 6 am and goes to bed around 10 pm.
//! Currently: Ada is preparing for the harvest festival.
//! ```

/// The value of the first `label:` occurrence, up to the end of its line.
fn labelled(persona: &str, label: &str) -> Option<String> {
    let (_, rest) = persona.split_once(label)?;
    let value = rest.lines().next().unwrap_or_default().trim();
    (!value.is_empty()).then(|| value.to_owned())
}

/// The `Name:` line.
pub fn first_name(persona: &str) -> Option<String> {
    labelled(persona, "Name:")
}

/// The `Lifestyle:` line.
pub fn lifestyle(persona: &str) -> Option<String> {
    labelled(persona, "Lifestyle:")
}

/// Replace every line starting with `Currently:` by `Currently: {status}`.
///
/// A persona without such a line is returned unchanged.
pub fn replace_currently(persona: &str, status: &str) -> String {
    let replaced: Vec<String> = persona
        .lines()
        .map(|line| {
            if line.starts_with("Currently:") {
                format!("Currently: {status}")
            } else {
                line.to_owned()
            }
        })
        .collect();
    let mut out = replaced.join("\n");
    if persona.ends_with('\n') {
        out.push('\n');
    }
    out
}
