//! Compiled templates and their rendering.

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use super::parser::{self, Arg, Command, Func, Node, Pipeline};
use super::path::JsonPath;
use crate::error::TemplateError;

/// A compiled template.
///
/// Compilation checks the action syntax, function names and arities, and
/// parses every literal path argument of the `ref` family. Rendering against
/// a data value never fails because a path is missing; it degrades to `null`
/// or an empty string depending on the function.
#[derive(Debug, Clone)]
pub struct Template {
    name: String,
    nodes: Vec<Node>,
    paths: HashMap<String, JsonPath>,
}

/// An evaluated argument.
enum Operand<'a> {
    Root(&'a Value),
    Text(String),
}

impl Operand<'_> {
    fn into_text(self) -> String {
        match self {
            Operand::Root(value) => value.to_string(),
            Operand::Text(text) => text,
        }
    }
}

impl Template {
    /// Compiles template source.
    ///
    /// # Arguments
    ///
    /// * `name` - Name used in log messages, usually the template file name.
    /// * `source` - Template text.
    ///
    /// # Errors
    ///
    /// Returns a [`TemplateError`] describing the first syntax problem found.
    pub fn compile(name: impl Into<String>, source: &str) -> Result<Self, TemplateError> {
        let nodes = parser::parse(source)?;
        let mut paths = HashMap::new();
        for node in &nodes {
            if let Node::Action(pipeline) = node {
                collect_paths(pipeline, &mut paths)?;
            }
        }
        Ok(Self {
            name: name.into(),
            nodes,
            paths,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Renders the template against `data`.
    pub fn render(&self, data: &Value) -> Result<String, TemplateError> {
        let mut out = String::new();
        for node in &self.nodes {
            match node {
                Node::Text(text) => out.push_str(text),
                Node::Action(pipeline) => out.push_str(&self.eval_pipeline(pipeline, data)?),
            }
        }
        Ok(out)
    }

    /// Renders the template and decodes the output as JSON.
    pub fn render_json<T: DeserializeOwned>(&self, data: &Value) -> Result<T, TemplateError> {
        let rendered = self.render(data)?;
        Ok(serde_json::from_str(&rendered)?)
    }

    fn eval_pipeline(&self, pipeline: &Pipeline, data: &Value) -> Result<String, TemplateError> {
        let mut piped: Option<String> = None;
        for command in &pipeline.commands {
            let output = match command {
                Command::Dot => data.to_string(),
                Command::Call { func, args } => {
                    let mut operands = Vec::with_capacity(args.len() + 1);
                    for arg in args {
                        operands.push(match arg {
                            Arg::Str(s) => Operand::Text(s.clone()),
                            Arg::Dot => Operand::Root(data),
                            Arg::Sub(sub) => Operand::Text(self.eval_pipeline(sub, data)?),
                        });
                    }
                    if let Some(previous) = piped.take() {
                        operands.push(Operand::Text(previous));
                    }
                    self.call(*func, operands, data)?
                }
            };
            piped = Some(output);
        }
        Ok(piped.unwrap_or_default())
    }

    fn call(&self, func: Func, operands: Vec<Operand<'_>>, data: &Value) -> Result<String, TemplateError> {
        match func {
            Func::Ref | Func::RefText | Func::RefQuote => {
                let (root, path) = ref_operands(func, operands, data)?;
                let resolved = self.resolve(root, &path);
                Ok(match (func, resolved) {
                    (Func::Ref, Some(value)) => value.to_string(),
                    (Func::Ref, None) => "null".to_string(),
                    (Func::RefText, Some(value)) => text_of(value),
                    (Func::RefText, None) => String::new(),
                    (_, Some(value)) => Value::String(text_of(value)).to_string(),
                    (_, None) => "\"\"".to_string(),
                })
            }
            Func::Trim => {
                let mut operands = operands.into_iter().map(Operand::into_text);
                let (Some(cutset), Some(s)) = (operands.next(), operands.next()) else {
                    return Err(arity(func, 2));
                };
                Ok(s.trim_matches(|c: char| cutset.contains(c)).to_string())
            }
            Func::UrlQuery => {
                let s = operands
                    .into_iter()
                    .next()
                    .map(Operand::into_text)
                    .ok_or_else(|| arity(func, 1))?;
                Ok(urlencoding::encode(&s).into_owned())
            }
        }
    }

    fn resolve(&self, root: &Value, expr: &str) -> Option<Value> {
        if let Some(path) = self.paths.get(expr) {
            return path.resolve(root);
        }
        match JsonPath::parse(expr) {
            Ok(path) => path.resolve(root),
            Err(e) => {
                debug!(template = %self.name, path = expr, error = %e, "Unresolvable path");
                None
            }
        }
    }
}

fn ref_operands<'a>(
    func: Func,
    operands: Vec<Operand<'a>>,
    data: &'a Value,
) -> Result<(&'a Value, String), TemplateError> {
    let mut operands = operands.into_iter();
    match (operands.next(), operands.next()) {
        (Some(Operand::Text(path)), None) => Ok((data, path)),
        // The root may come before or after the path.
        (Some(Operand::Root(root)), Some(Operand::Text(path)))
        | (Some(Operand::Text(path)), Some(Operand::Root(root))) => Ok((root, path)),
        (Some(Operand::Root(_)), _) => Err(TemplateError::InvalidArgument {
            name: func.name().to_string(),
            reason: "path must be a string".to_string(),
        }),
        (Some(Operand::Text(_)), Some(Operand::Text(_))) => Err(TemplateError::InvalidArgument {
            name: func.name().to_string(),
            reason: "one of two arguments must be '.'".to_string(),
        }),
        (None, _) => Err(arity(func, 1)),
    }
}

fn arity(func: Func, expected: usize) -> TemplateError {
    TemplateError::Arity {
        name: func.name().to_string(),
        expected: expected.to_string(),
        got: 0,
    }
}

fn text_of(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

/// Parses the literal path arguments of `ref`-family calls.
fn collect_paths(
    pipeline: &Pipeline,
    paths: &mut HashMap<String, JsonPath>,
) -> Result<(), TemplateError> {
    for command in &pipeline.commands {
        let Command::Call { func, args } = command else {
            continue;
        };
        for arg in args {
            match arg {
                Arg::Sub(sub) => collect_paths(sub, paths)?,
                Arg::Str(expr)
                    if matches!(func, Func::Ref | Func::RefText | Func::RefQuote)
                        && !paths.contains_key(expr) =>
                {
                    let path = JsonPath::parse(expr).map_err(|e| TemplateError::InvalidArgument {
                        name: func.name().to_string(),
                        reason: e.to_string(),
                    })?;
                    paths.insert(expr.clone(), path);
                }
                _ => {}
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn render(source: &str, data: &Value) -> String {
        Template::compile("test", source)
            .expect("compile")
            .render(data)
            .expect("render")
    }

    #[test]
    fn test_missing_member_renders_null() {
        let data = json!({"username": {"family": "k"}});
        let out = render(
            r#"{"first":{{ref "/username/given"}},"last":{{ref "/username/family"}}}"#,
            &data,
        );
        assert_eq!(out, r#"{"first":null,"last":"k"}"#);
    }

    #[test]
    fn test_ref_variants() {
        let data = json!({"name": "khs", "age": 7, "tags": ["a"]});
        assert_eq!(render(r#"{{ref "$.name"}}"#, &data), r#""khs""#);
        assert_eq!(render(r#"{{refjs . "$.tags"}}"#, &data), r#"["a"]"#);
        assert_eq!(render(r#"{{reftext "$.name"}}"#, &data), "khs");
        assert_eq!(render(r#"{{reftext "$.age"}}"#, &data), "7");
        assert_eq!(render(r#"{{reftext "$.nope"}}"#, &data), "");
        assert_eq!(render(r#"{{refquote "$.age"}}"#, &data), r#""7""#);
        assert_eq!(render(r#"{{refquote "$.nope"}}"#, &data), r#""""#);
        assert_eq!(render(r#"{{refquote "$.name"}}"#, &data), r#""khs""#);
    }

    #[test]
    fn test_recursive_path_renders_array() {
        let data = json!([
            {"username": {"given": "hs"}},
            {"username": {"given": "hanson"}}
        ]);
        assert_eq!(render(r#"{{ref "$..given"}}"#, &data), r#"["hs","hanson"]"#);
    }

    #[test]
    fn test_quoted_text_is_escaped() {
        let data = json!({"msg": "say \"hi\"\n"});
        let out = render(r#"{"m":{{refquote "$.msg"}}}"#, &data);
        let decoded: Value = serde_json::from_str(&out).expect("valid json");
        assert_eq!(decoded["m"], "say \"hi\"\n");
    }

    #[test]
    fn test_trim_and_pipes() {
        let data = json!({"id": "--42--"});
        assert_eq!(render(r#"{{trim "-" (reftext "$.id")}}"#, &data), "42");
        assert_eq!(render(r#"{{reftext "$.id" | trim "-"}}"#, &data), "42");
        assert_eq!(render(r#"{{trim "xy" "xxhixy"}}"#, &data), "hi");
    }

    #[test]
    fn test_urlquery() {
        let data = json!({"q": "a b&c"});
        assert_eq!(
            render(r#"q={{reftext "$.q" | urlquery}}"#, &data),
            "q=a%20b%26c"
        );
    }

    #[test]
    fn test_dot_renders_whole_root() {
        let data = json!({"b": 1, "a": 2});
        assert_eq!(render("{{ . }}", &data), r#"{"b":1,"a":2}"#);
    }

    #[test]
    fn test_render_json() {
        let template = Template::compile("req", r#"{"Url":{{ref "$.url"}}}"#).expect("compile");
        let value: Value = template
            .render_json(&json!({"url": "http://x"}))
            .expect("json");
        assert_eq!(value, json!({"Url": "http://x"}));

        let broken = Template::compile("req", r#"{"Url":{{reftext "$.url"}}}"#).expect("compile");
        assert!(matches!(
            broken.render_json::<Value>(&json!({"url": "http://x"})),
            Err(TemplateError::Json(_))
        ));
    }

    #[test]
    fn test_invalid_literal_path_fails_compile() {
        let result = Template::compile("bad", r#"{{ref "$[?(@.a)]"}}"#);
        assert!(matches!(result, Err(TemplateError::InvalidArgument { .. })));
    }

    #[test]
    fn test_invalid_piped_path_is_unresolved() {
        let data = json!({"p": "$["});
        assert_eq!(render(r#"{{reftext "$.p" | ref}}"#, &data), "null");
    }

    #[test]
    fn test_ref_accepts_root_on_either_side() {
        let data = json!({"StatusCode": 200, "BodyText": "ok"});
        for (dot_first, path_first, expected) in [
            (r#"{{ref . "$.StatusCode"}}"#, r#"{{ref "$.StatusCode" .}}"#, "200"),
            (r#"{{refjs . "$.StatusCode"}}"#, r#"{{refjs "$.StatusCode" .}}"#, "200"),
            (r#"{{reftext . "$.BodyText"}}"#, r#"{{reftext "$.BodyText" .}}"#, "ok"),
            (r#"{{refquote . "$.StatusCode"}}"#, r#"{{refquote "$.StatusCode" .}}"#, r#""200""#),
        ] {
            assert_eq!(render(dot_first, &data), expected, "{}", dot_first);
            assert_eq!(render(path_first, &data), expected, "{}", path_first);
        }
        assert_eq!(render(r#"{{ref "$.missing" .}}"#, &data), "null");
    }

    #[test]
    fn test_ref_without_path_fails() {
        let template = Template::compile("bad", "{{ref . .}}").expect("compile");
        assert!(matches!(
            template.render(&json!({})),
            Err(TemplateError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn test_ref_with_non_root_first_argument() {
        let template = Template::compile("bad", r#"{{ref "$.a" "$.b"}}"#).expect("compile");
        assert!(matches!(
            template.render(&json!({})),
            Err(TemplateError::InvalidArgument { .. })
        ));
    }
}
