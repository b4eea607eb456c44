use once_cell::sync::Lazy;
use std::collections::BTreeMap;

/// A node in a task template; `{title}` in the name is substituted on apply
pub(crate) struct TemplateNode {
    pub name: &'static str,
    pub children: &'static [TemplateNode],
}

macro_rules! leaves {
    ($($name:literal),+ $(,)?) => {
        &[$(TemplateNode { name: $name, children: &[] }),+]
    };
}

pub(crate) static TEMPLATES: Lazy<BTreeMap<&'static str, TemplateNode>> = Lazy::new(|| {
    let mut templates = BTreeMap::new();
    templates.insert(
        "feature",
        TemplateNode {
            name: "Feature: {title}",
            children: leaves![
                "Research and design",
                "Implementation",
                "Write tests",
                "Documentation",
                "Code review",
            ],
        },
    );
    templates.insert(
        "bug_fix",
        TemplateNode {
            name: "Bug Fix: {title}",
            children: leaves![
                "Reproduce issue",
                "Identify root cause",
                "Implement fix",
                "Add regression test",
                "Verify fix",
            ],
        },
    );
    templates.insert(
        "refactor",
        TemplateNode {
            name: "Refactor: {title}",
            children: leaves![
                "Analyze current code",
                "Plan refactoring",
                "Apply changes incrementally",
                "Update tests",
                "Verify functionality",
            ],
        },
    );
    templates.insert(
        "review",
        TemplateNode {
            name: "Code Review: {title}",
            children: leaves![
                "Review code changes",
                "Check test coverage",
                "Verify documentation",
                "Leave feedback",
            ],
        },
    );
    templates.insert(
        "release",
        TemplateNode {
            name: "Release: {title}",
            children: leaves![
                "Update version numbers",
                "Update changelog",
                "Run full test suite",
                "Build release artifacts",
                "Deploy to staging",
                "Verify staging",
                "Deploy to production",
                "Post-release verification",
            ],
        },
    );
    templates
});

/// Names of the registered templates
pub fn template_names() -> Vec<&'static str> {
    TEMPLATES.keys().copied().collect()
}
