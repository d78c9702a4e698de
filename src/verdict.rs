use crate::models::Verdict;

/// Verdicts that override everything after them when present anywhere
const PRIORITY: [Verdict; 5] = [
    Verdict::CompilationError,
    Verdict::Error,
    Verdict::RuntimeError,
    Verdict::TimeLimitExceeded,
    Verdict::WrongAnswer,
];

/// Reduces per-test-case verdicts to the overall status of a submission
///
/// The first verdict of [`PRIORITY`] found in the list wins. Otherwise the
/// submission is accepted only if every case is, and an empty list is an error.
pub fn aggregate(verdicts: &[Verdict]) -> Verdict {
    if verdicts.is_empty() {
        return Verdict::Error;
    }

    if let Some(found) = PRIORITY.iter().find(|p| verdicts.contains(p)) {
        return *found;
    }

    if verdicts.iter().all(|v| *v == Verdict::Accepted) {
        Verdict::Accepted
    } else {
        Verdict::Error
    }
}

/// Compares program output with the expected answer
///
/// Both sides are trimmed of surrounding whitespace, then compared byte by byte.
pub fn output_matches(program_output: &str, expected_output: &str) -> bool {
    program_output.trim().as_bytes() == expected_output.trim().as_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use Verdict::*;

    #[test]
    fn empty_list_is_never_accepted() {
        assert_eq!(aggregate(&[]), Error);
    }

    #[test]
    fn all_accepted() {
        assert_eq!(aggregate(&[Accepted, Accepted, Accepted]), Accepted);
    }

    #[test]
    fn priority_order_is_respected() {
        assert_eq!(aggregate(&[WrongAnswer, CompilationError, Error]), CompilationError);
        assert_eq!(aggregate(&[RuntimeError, Error, Accepted]), Error);
        assert_eq!(aggregate(&[TimeLimitExceeded, RuntimeError]), RuntimeError);
        assert_eq!(aggregate(&[WrongAnswer, TimeLimitExceeded]), TimeLimitExceeded);
        assert_eq!(aggregate(&[Accepted, WrongAnswer, Accepted]), WrongAnswer);
    }

    #[test]
    fn output_comparison_trims_both_sides() {
        assert!(output_matches("3\n", "3"));
        assert!(output_matches("  1 2\n3\n\n", "1 2\n3"));
        assert!(!output_matches("1  2", "1 2"));
        assert!(!output_matches("1\r\n2", "1\n2"));
    }
}
