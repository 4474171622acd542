//! Interactive question trees and the cross-plugin merge.
//!
//! Before an interactive phase runs, every plugin with the `Questions`
//! capability contributes a subtree of configuration questions. This
//! crate models those trees and splices them into one tree the front
//! end can render. Rendering itself is external; the engine only
//! consumes the resulting flat answer map.
//!
//! Answer paths are slash-joined node ids starting at the subtree root
//! (e.g. `capabilities/azure-resources`). A node's condition may
//! reference any path in the merged tree, which is what allows
//! cross-plugin conditioning.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use ensemble_utils::error::{EnsembleError, UserError};

/// Flat answer map produced by the (external) question front end.
pub type Answers = BTreeMap<String, AnswerValue>;

/// A single answer value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnswerValue {
    Flag(bool),
    Text(String),
    Multi(Vec<String>),
}

impl AnswerValue {
    /// True if this answer matches `expected`: equality for text and
    /// flags, membership for multi-selections.
    #[must_use]
    pub fn matches(&self, expected: &str) -> bool {
        match self {
            Self::Text(value) => value == expected,
            Self::Flag(value) => (*value && expected == "true") || (!*value && expected == "false"),
            Self::Multi(values) => values.iter().any(|v| v == expected),
        }
    }
}

/// What kind of prompt a node renders as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QuestionKind {
    /// Structural node; carries children, never an answer.
    Group,
    Text,
    SingleSelect,
    MultiSelect,
    Confirm,
}

/// Visibility condition: the node is asked only when the answer at
/// `path` matches `expected` (see [`AnswerValue::matches`]).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    pub path: String,
    pub expected: String,
}

impl Condition {
    #[must_use]
    pub fn is_met(&self, answers: &Answers) -> bool {
        answers
            .get(&self.path)
            .is_some_and(|value| value.matches(&self.expected))
    }
}

/// Option set for select questions: absent, fixed, or computed against
/// the answers gathered so far.
#[derive(Clone, Default)]
pub enum OptionSource {
    #[default]
    None,
    Static(Vec<String>),
    Dynamic(Arc<dyn Fn(&Answers) -> Vec<String> + Send + Sync>),
}

impl OptionSource {
    /// Resolve the concrete option list for the current answers.
    #[must_use]
    pub fn resolve(&self, answers: &Answers) -> Option<Vec<String>> {
        match self {
            Self::None => None,
            Self::Static(options) => Some(options.clone()),
            Self::Dynamic(f) => Some(f(answers)),
        }
    }
}

impl fmt::Debug for OptionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Static(options) => f.debug_tuple("Static").field(options).finish(),
            Self::Dynamic(_) => f.write_str("Dynamic(..)"),
        }
    }
}

/// Validation predicate applied to a node's answer.
pub type Validator = Arc<dyn Fn(&AnswerValue) -> Result<(), String> + Send + Sync>;

/// One node of a question tree.
///
/// Built with the fluent constructors; plugins return a subtree from
/// their `questions` hook and the engine merges them.
#[derive(Clone)]
pub struct QuestionNode {
    pub id: String,
    pub title: String,
    pub kind: QuestionKind,
    pub options: OptionSource,
    pub condition: Option<Condition>,
    pub validate: Option<Validator>,
    pub children: Vec<QuestionNode>,
}

impl fmt::Debug for QuestionNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuestionNode")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("condition", &self.condition)
            .field("children", &self.children)
            .finish_non_exhaustive()
    }
}

impl QuestionNode {
    fn new(id: &str, title: &str, kind: QuestionKind) -> Self {
        Self {
            id: id.to_string(),
            title: title.to_string(),
            kind,
            options: OptionSource::None,
            condition: None,
            validate: None,
            children: Vec::new(),
        }
    }

    #[must_use]
    pub fn group(id: &str) -> Self {
        Self::new(id, id, QuestionKind::Group)
    }

    #[must_use]
    pub fn text(id: &str, title: &str) -> Self {
        Self::new(id, title, QuestionKind::Text)
    }

    #[must_use]
    pub fn confirm(id: &str, title: &str) -> Self {
        Self::new(id, title, QuestionKind::Confirm)
    }

    #[must_use]
    pub fn single_select(id: &str, title: &str, options: Vec<String>) -> Self {
        let mut node = Self::new(id, title, QuestionKind::SingleSelect);
        node.options = OptionSource::Static(options);
        node
    }

    #[must_use]
    pub fn multi_select(id: &str, title: &str, options: Vec<String>) -> Self {
        let mut node = Self::new(id, title, QuestionKind::MultiSelect);
        node.options = OptionSource::Static(options);
        node
    }

    #[must_use]
    pub fn with_dynamic_options(
        mut self,
        f: impl Fn(&Answers) -> Vec<String> + Send + Sync + 'static,
    ) -> Self {
        self.options = OptionSource::Dynamic(Arc::new(f));
        self
    }

    #[must_use]
    pub fn with_condition(mut self, path: &str, expected: &str) -> Self {
        self.condition = Some(Condition {
            path: path.to_string(),
            expected: expected.to_string(),
        });
        self
    }

    #[must_use]
    pub fn with_validator(
        mut self,
        f: impl Fn(&AnswerValue) -> Result<(), String> + Send + Sync + 'static,
    ) -> Self {
        self.validate = Some(Arc::new(f));
        self
    }

    #[must_use]
    pub fn with_child(mut self, child: QuestionNode) -> Self {
        self.children.push(child);
        self
    }

    /// Fully-qualified answer paths of every answerable (non-group)
    /// node in this subtree, in declaration order.
    #[must_use]
    pub fn answer_paths(&self) -> Vec<String> {
        let mut paths = Vec::new();
        self.collect_paths("", &mut paths);
        paths
    }

    fn path_for(&self, prefix: &str) -> String {
        if prefix.is_empty() {
            self.id.clone()
        } else {
            format!("{prefix}/{}", self.id)
        }
    }

    fn collect_paths(&self, prefix: &str, out: &mut Vec<String>) {
        let path = self.path_for(prefix);
        if self.kind != QuestionKind::Group {
            out.push(path.clone());
        }
        for child in &self.children {
            child.collect_paths(&path, out);
        }
    }

    fn collect_visible<'a>(
        &'a self,
        prefix: &str,
        answers: &Answers,
        out: &mut Vec<(String, &'a QuestionNode)>,
    ) {
        if let Some(condition) = &self.condition
            && !condition.is_met(answers)
        {
            // An unmet condition hides the whole subtree.
            return;
        }
        let path = self.path_for(prefix);
        if self.kind != QuestionKind::Group {
            out.push((path.clone(), self));
        }
        for child in &self.children {
            child.collect_visible(&path, answers, out);
        }
    }
}

/// A merged question tree: one root group with each plugin's subtree
/// spliced in, plus the plugin attribution needed for error reporting.
#[derive(Debug, Clone)]
pub struct MergedQuestions {
    pub root: QuestionNode,
    /// Answer path → contributing plugin name.
    pub owners: BTreeMap<String, String>,
}

impl MergedQuestions {
    /// Answerable questions currently visible given `answers`, with
    /// their fully-qualified paths.
    #[must_use]
    pub fn visible(&self, answers: &Answers) -> Vec<(String, &QuestionNode)> {
        let mut out = Vec::new();
        for child in &self.root.children {
            child.collect_visible("", answers, &mut out);
        }
        out
    }

    /// Validates a flat answer map against the merged tree.
    ///
    /// Visible questions must be answered; select answers must come
    /// from the node's (possibly dynamic) option set; node validators
    /// run last.
    ///
    /// # Errors
    /// `UserError::MissingInput` or `UserError::InvalidSelection`.
    pub fn validate_answers(&self, answers: &Answers) -> Result<(), EnsembleError> {
        for (path, node) in self.visible(answers) {
            let Some(value) = answers.get(&path) else {
                return Err(UserError::MissingInput { key: path }.into());
            };

            if let Some(options) = node.options.resolve(answers) {
                let out_of_set = match value {
                    AnswerValue::Text(v) => (!options.contains(v)).then(|| v.clone()),
                    AnswerValue::Multi(vs) => {
                        vs.iter().find(|v| !options.contains(v)).cloned()
                    }
                    AnswerValue::Flag(_) => None,
                };
                if let Some(bad) = out_of_set {
                    return Err(UserError::InvalidSelection {
                        path,
                        value: bad,
                        reason: "not in the option set".to_string(),
                    }
                    .into());
                }
            }

            if let Some(validate) = &node.validate
                && let Err(reason) = validate(value)
            {
                return Err(UserError::InvalidSelection {
                    path,
                    value: format!("{value:?}"),
                    reason,
                }
                .into());
            }
        }
        Ok(())
    }
}

/// Splice per-plugin question subtrees into one tree.
///
/// Subtrees keep their authored ids; the fully-qualified answer path of
/// a node is the slash-joined id chain from its subtree root. Two
/// eligible plugins contributing the same fully-qualified path is a
/// registration error and fails with `DuplicateQuestionIdError` before
/// any phase side effect occurs.
///
/// # Errors
/// `EnsembleError::DuplicateQuestionId` naming the colliding path and
/// both plugins.
pub fn merge_question_trees(
    subtrees: Vec<(String, QuestionNode)>,
) -> Result<MergedQuestions, EnsembleError> {
    let mut owners: BTreeMap<String, String> = BTreeMap::new();
    let mut root = QuestionNode::group("root");

    for (plugin, subtree) in subtrees {
        for path in subtree.answer_paths() {
            if let Some(first) = owners.get(&path) {
                return Err(EnsembleError::DuplicateQuestionId {
                    path,
                    first: first.clone(),
                    second: plugin,
                });
            }
            owners.insert(path, plugin.clone());
        }
        root.children.push(subtree);
    }

    Ok(MergedQuestions { root, owners })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frontend_tree() -> QuestionNode {
        QuestionNode::group("frontend")
            .with_child(QuestionNode::single_select(
                "hosting",
                "Where should the frontend be hosted?",
                vec!["storage".into(), "cdn".into()],
            ))
            .with_child(
                QuestionNode::text("cdn-profile", "CDN profile name")
                    .with_condition("frontend/hosting", "cdn"),
            )
    }

    fn bot_tree() -> QuestionNode {
        QuestionNode::group("bot").with_child(
            QuestionNode::multi_select(
                "channels",
                "Which channels should the bot join?",
                vec!["teams".into(), "slack".into()],
            ),
        )
    }

    #[test]
    fn merge_distinct_paths_succeeds() {
        let merged =
            merge_question_trees(vec![("frontend".into(), frontend_tree()), ("bot".into(), bot_tree())])
                .unwrap();
        assert_eq!(merged.owners.len(), 3);
        assert_eq!(merged.owners["bot/channels"], "bot");
        assert_eq!(merged.owners["frontend/hosting"], "frontend");
    }

    #[test]
    fn merge_identical_paths_fails() {
        let err = merge_question_trees(vec![
            ("frontend".into(), frontend_tree()),
            ("frontend-v2".into(), frontend_tree()),
        ])
        .unwrap_err();
        match err {
            EnsembleError::DuplicateQuestionId { path, first, second } => {
                assert_eq!(path, "frontend/hosting");
                assert_eq!(first, "frontend");
                assert_eq!(second, "frontend-v2");
            }
            other => panic!("expected DuplicateQuestionId, got {other:?}"),
        }
    }

    #[test]
    fn condition_hides_subtree_until_met() {
        let merged = merge_question_trees(vec![("frontend".into(), frontend_tree())]).unwrap();

        let mut answers = Answers::new();
        let visible: Vec<String> = merged.visible(&answers).into_iter().map(|(p, _)| p).collect();
        assert_eq!(visible, ["frontend/hosting"]);

        answers.insert("frontend/hosting".into(), AnswerValue::Text("cdn".into()));
        let visible: Vec<String> = merged.visible(&answers).into_iter().map(|(p, _)| p).collect();
        assert_eq!(visible, ["frontend/hosting", "frontend/cdn-profile"]);
    }

    #[test]
    fn cross_plugin_condition() {
        // Bot's question only appears when the frontend capability
        // answer includes "cdn".
        let bot = QuestionNode::group("bot").with_child(
            QuestionNode::text("cdn-origin", "Origin for bot assets")
                .with_condition("frontend/hosting", "cdn"),
        );
        let merged =
            merge_question_trees(vec![("frontend".into(), frontend_tree()), ("bot".into(), bot)])
                .unwrap();

        let mut answers = Answers::new();
        answers.insert("frontend/hosting".into(), AnswerValue::Text("storage".into()));
        assert!(merged.visible(&answers).iter().all(|(p, _)| p != "bot/cdn-origin"));

        answers.insert("frontend/hosting".into(), AnswerValue::Text("cdn".into()));
        assert!(merged.visible(&answers).iter().any(|(p, _)| p == "bot/cdn-origin"));
    }

    #[test]
    fn validate_rejects_missing_and_out_of_set() {
        let merged = merge_question_trees(vec![("frontend".into(), frontend_tree())]).unwrap();

        let err = merged.validate_answers(&Answers::new()).unwrap_err();
        assert!(matches!(
            err,
            EnsembleError::User(UserError::MissingInput { .. })
        ));

        let mut answers = Answers::new();
        answers.insert("frontend/hosting".into(), AnswerValue::Text("ftp".into()));
        let err = merged.validate_answers(&answers).unwrap_err();
        assert!(matches!(
            err,
            EnsembleError::User(UserError::InvalidSelection { .. })
        ));

        answers.insert("frontend/hosting".into(), AnswerValue::Text("storage".into()));
        merged.validate_answers(&answers).unwrap();
    }

    #[test]
    fn dynamic_options_resolve_against_answers() {
        let node = QuestionNode::single_select("region", "Region", vec![])
            .with_dynamic_options(|answers| {
                if answers.get("tier").is_some_and(|v| v.matches("premium")) {
                    vec!["eu-west".into(), "us-east".into()]
                } else {
                    vec!["us-east".into()]
                }
            });
        let mut answers = Answers::new();
        assert_eq!(node.options.resolve(&answers).unwrap(), ["us-east"]);
        answers.insert("tier".into(), AnswerValue::Text("premium".into()));
        assert_eq!(node.options.resolve(&answers).unwrap().len(), 2);
    }
}
