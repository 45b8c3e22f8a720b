use anyhow::anyhow;

/// Collapse a list of independent failures into a single error.
///
/// Returns `Ok(())` for an empty list, the error itself for a single
/// failure, and an aggregate listing every message otherwise. Used where a
/// batch operation must attempt every item before reporting.
pub fn join_errors(errors: Vec<anyhow::Error>) -> anyhow::Result<()> {
    let mut errors = errors;
    match errors.len() {
        0 => Ok(()),
        1 => Err(errors.remove(0)),
        n => {
            let joined = errors
                .iter()
                .map(|e| format!("{e:#}"))
                .collect::<Vec<_>>()
                .join("; ");
            Err(anyhow!("{n} failures: {joined}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_is_ok() {
        assert!(join_errors(vec![]).is_ok());
    }

    #[test]
    fn single_error_passes_through() {
        let err = join_errors(vec![anyhow!("boom")]).unwrap_err();
        assert_eq!(err.to_string(), "boom");
    }

    #[test]
    fn many_errors_are_listed() {
        let err = join_errors(vec![anyhow!("a"), anyhow!("b")]).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("2 failures"));
        assert!(msg.contains('a') && msg.contains('b'));
    }
}
