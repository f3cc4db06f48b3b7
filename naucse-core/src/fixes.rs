//! Compatibility fixes for courses built with old `naucse_render` releases.
//!
//! Both tables are ordered rule lists applied in sequence; adding a fix
//! means adding a row, not a branch.

/// A requirement line that, when present verbatim, pulls in extra pins.
#[derive(Debug, Clone, Copy)]
pub struct RequirementFix {
    /// Exact line of `requirements.txt` that triggers the fix.
    pub trigger: &'static str,
    /// Lines appended to the listing.
    pub additions: &'static [&'static str],
}

/// A package that needs something installed before the main listing.
#[derive(Debug, Clone, Copy)]
pub struct PrerequisiteRule {
    /// Prefix of a pinned line (`name==version`) that triggers the rule.
    pub prefix: &'static str,
    /// Requirement installed in the separate pre-install step.
    pub requirement: &'static str,
}

/// Known-obsolete requirement combinations.
pub const REQUIREMENT_FIXES: &[RequirementFix] = &[RequirementFix {
    trigger: "naucse_render<1.0",
    additions: &["naucse_render < 1.4", "nbconvert < 6"],
}];

/// Packages whose build breaks with current setuptools.
pub const PREREQUISITE_RULES: &[PrerequisiteRule] =
    &[PrerequisiteRule { prefix: "markupsafe==1.0", requirement: "setuptools < 46" }];

const COMPAT_HEADER: &str = "# compatibility requirements";

/// Add common missing requirements to an old `requirements.txt`.
///
/// The input is kept verbatim; additions go after a blank line and a marker
/// comment, in rule order.
pub fn fix_requirements(input: &str, rules: &[RequirementFix]) -> String {
    let lines: Vec<&str> = input.lines().collect();
    let additions: Vec<&str> = rules
        .iter()
        .filter(|rule| lines.contains(&rule.trigger))
        .flat_map(|rule| rule.additions.iter().copied())
        .collect();

    let mut result = vec![input];
    if !additions.is_empty() {
        result.push("");
        result.push(COMPAT_HEADER);
        result.extend(additions);
    }
    result.join("\n")
}

/// Build-time prerequisites for a pinned listing, one per line.
pub fn find_prerequisites(listing: &str, rules: &[PrerequisiteRule]) -> String {
    let mut found: Vec<&str> = Vec::new();
    for rule in rules {
        let applies = listing.lines().any(|line| line.starts_with(rule.prefix));
        if applies && !found.contains(&rule.requirement) {
            found.push(rule.requirement);
        }
    }
    found.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_old_naucse_render_gets_pins() {
        let fixed = fix_requirements("naucse_render<1.0\n", REQUIREMENT_FIXES);
        assert!(fixed.starts_with("naucse_render<1.0\n"));
        let lines: Vec<&str> = fixed.lines().collect();
        assert!(lines.contains(&"naucse_render < 1.4"));
        assert!(lines.contains(&"nbconvert < 6"));
        assert!(lines.contains(&COMPAT_HEADER));
    }

    #[test]
    fn test_exact_output_shape() {
        assert_eq!(
            fix_requirements("naucse_render<1.0", REQUIREMENT_FIXES),
            "naucse_render<1.0\n\n# compatibility requirements\nnaucse_render < 1.4\nnbconvert < 6"
        );
    }

    #[test]
    fn test_unrelated_listing_untouched() {
        let input = "naucse_render==1.3\nflask\n";
        assert_eq!(fix_requirements(input, REQUIREMENT_FIXES), input);
    }

    #[test]
    fn test_trigger_must_match_whole_line() {
        let input = "naucse_render<1.0.1\n";
        assert_eq!(fix_requirements(input, REQUIREMENT_FIXES), input);
    }

    #[test]
    fn test_custom_rules_apply_in_order() {
        let rules = [
            RequirementFix { trigger: "b", additions: &["b-fix"] },
            RequirementFix { trigger: "a", additions: &["a-fix"] },
        ];
        assert_eq!(
            fix_requirements("a\nb", &rules),
            "a\nb\n\n# compatibility requirements\nb-fix\na-fix"
        );
    }

    #[test]
    fn test_prerequisites_for_old_markupsafe() {
        let listing = concat!(
            "jinja2==2.10 \\\n    --hash=sha256:aa\n",
            "markupsafe==1.0 \\\n    --hash=sha256:bb\n",
        );
        assert_eq!(find_prerequisites(listing, PREREQUISITE_RULES), "setuptools < 46");
    }

    #[test]
    fn test_no_prerequisites() {
        assert_eq!(find_prerequisites("markupsafe==2.1.1\n", PREREQUISITE_RULES), "");
    }

    #[test]
    fn test_prerequisites_deduplicated() {
        let rules = [
            PrerequisiteRule { prefix: "a==", requirement: "setuptools < 46" },
            PrerequisiteRule { prefix: "b==", requirement: "setuptools < 46" },
        ];
        assert_eq!(find_prerequisites("a==1\nb==2\n", &rules), "setuptools < 46");
    }
}
