//! Configuration loading.

use camino::Utf8Path;
use serde_json::{Map, Number, Value};
use std::fs;
use std::sync::Arc;
use swc_common::SourceMap;
use swc_ecma_ast::{
    Callee, Decl, ExportDefaultExpr, Expr, KeyValueProp, Lit, Module, ModuleDecl, ModuleItem,
    ObjectLit, Pat, Prop, PropName, PropOrSpread, Stmt, UnaryOp,
};
use swc_ecma_parser::{parse_file_as_module, EsSyntax, Syntax, TsSyntax};

/// The parts of a Svelte project configuration the preprocessor needs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SvelteConfig {
    /// File extensions to process.
    pub extensions: Vec<String>,

    /// Options passed to the preprocessor call in `preprocess`.
    pub preprocess: Option<Value>,
}

impl SvelteConfig {
    /// Loads configuration from a svelte.config.js file.
    pub fn load(project_root: &Utf8Path) -> Self {
        let config_files = ["svelte.config.js", "svelte.config.mjs", "svelte.config.ts"];

        for config_file in config_files {
            let config_path = project_root.join(config_file);
            if config_path.exists() {
                match Self::parse_config(&config_path) {
                    Ok(config) => return config,
                    Err(e) => {
                        tracing::warn!(path = %config_path, "Failed to parse svelte config: {e}");
                        return Self::default();
                    }
                }
            }
        }

        Self::default()
    }

    /// Parses a svelte.config.js or svelte.config.ts file using SWC.
    fn parse_config(path: &Utf8Path) -> Result<Self, String> {
        let content = fs::read_to_string(path).map_err(|e| e.to_string())?;
        Self::parse_source(&content, path.as_str().ends_with(".ts"))
    }

    fn parse_source(content: &str, typescript: bool) -> Result<Self, String> {
        let cm: Arc<SourceMap> = Default::default();
        let fm = cm.new_source_file(
            swc_common::FileName::Custom("svelte.config".to_string()).into(),
            content.to_string(),
        );

        let syntax = if typescript {
            Syntax::Typescript(TsSyntax {
                tsx: false,
                ..Default::default()
            })
        } else {
            Syntax::Es(EsSyntax {
                jsx: false,
                ..Default::default()
            })
        };

        let module = parse_file_as_module(
            &fm,
            syntax,
            swc_ecma_ast::EsVersion::Es2022,
            None,
            &mut Vec::new(),
        )
        .map_err(|e| format!("Parse error: {:?}", e))?;

        let mut config = SvelteConfig::default();
        if let Some(obj) = default_export_object(&module) {
            config.extract_from_object(obj);
        }
        Ok(config)
    }

    fn extract_from_object(&mut self, obj: &ObjectLit) {
        for (key, value) in key_values(obj) {
            match key {
                "extensions" => {
                    if let Expr::Array(arr) = value {
                        for elem in arr.elems.iter().flatten() {
                            if let Expr::Lit(Lit::Str(s)) = elem.expr.as_ref() {
                                if let Some(ext) = s.value.as_str() {
                                    self.extensions.push(ext.to_string());
                                }
                            }
                        }
                    }
                }
                "preprocess" => self.preprocess = preprocess_options(value),
                _ => {}
            }
        }
    }

    /// Returns the file extensions to process.
    pub fn file_extensions(&self) -> Vec<&str> {
        if self.extensions.is_empty() {
            vec![".svelte"]
        } else {
            self.extensions.iter().map(|s| s.as_str()).collect()
        }
    }
}

/// Finds the object literal exported by default, following a top-level
/// `const config = { ... }` when the export names a binding.
fn default_export_object(module: &Module) -> Option<&ObjectLit> {
    let exported = module.body.iter().find_map(|item| match item {
        ModuleItem::ModuleDecl(ModuleDecl::ExportDefaultExpr(ExportDefaultExpr { expr, .. })) => {
            Some(peel(expr))
        }
        _ => None,
    })?;

    match exported {
        Expr::Object(obj) => Some(obj),
        Expr::Ident(ident) => binding_init(module, ident.sym.as_str()).and_then(|init| match init {
            Expr::Object(obj) => Some(obj),
            _ => None,
        }),
        _ => None,
    }
}

fn binding_init<'a>(module: &'a Module, name: &str) -> Option<&'a Expr> {
    module.body.iter().find_map(|item| {
        let ModuleItem::Stmt(Stmt::Decl(Decl::Var(var))) = item else {
            return None;
        };
        var.decls.iter().find_map(|decl| match &decl.name {
            Pat::Ident(binding) if binding.id.sym.as_str() == name => {
                decl.init.as_deref().map(peel)
            }
            _ => None,
        })
    })
}

/// Strips parentheses and TypeScript-only wrappers.
fn peel(expr: &Expr) -> &Expr {
    match expr {
        Expr::Paren(paren) => peel(&paren.expr),
        Expr::TsAs(ts_as) => peel(&ts_as.expr),
        Expr::TsSatisfies(satisfies) => peel(&satisfies.expr),
        Expr::TsConstAssertion(assertion) => peel(&assertion.expr),
        _ => expr,
    }
}

/// Options of the preprocessor named in `preprocess`.
///
/// Accepts `preprocess: sveltePreprocess({ ... })` and
/// `preprocess: [sveltePreprocess({ ... }), ...]`; a call without an object
/// argument yields `{}`.
fn preprocess_options(value: &Expr) -> Option<Value> {
    let call = match peel(value) {
        Expr::Call(call) => call,
        Expr::Array(arr) => arr.elems.iter().flatten().find_map(|elem| match peel(&elem.expr) {
            Expr::Call(call) => Some(call),
            _ => None,
        })?,
        _ => return None,
    };

    if !matches!(call.callee, Callee::Expr(_)) {
        return None;
    }

    match call.args.first() {
        None => Some(Value::Object(Map::new())),
        Some(arg) if arg.spread.is_none() => match peel(&arg.expr) {
            Expr::Object(obj) => Some(object_to_json(obj)),
            _ => None,
        },
        Some(_) => None,
    }
}

fn key_values(obj: &ObjectLit) -> impl Iterator<Item = (&str, &Expr)> + '_ {
    obj.props.iter().filter_map(|prop| {
        let PropOrSpread::Prop(prop) = prop else {
            return None;
        };
        let Prop::KeyValue(KeyValueProp { key, value }) = prop.as_ref() else {
            return None;
        };
        prop_name_str(key).map(|name| (name, value.as_ref()))
    })
}

fn prop_name_str(key: &PropName) -> Option<&str> {
    match key {
        PropName::Ident(ident) => Some(ident.sym.as_str()),
        PropName::Str(s) => s.value.as_str(),
        _ => None,
    }
}

/// Converts an object literal to JSON. Properties whose values are not
/// static (functions, identifiers, spreads) are left out.
fn object_to_json(obj: &ObjectLit) -> Value {
    let mut map = Map::new();
    for (key, value) in key_values(obj) {
        match expr_to_json(value) {
            Some(json) => {
                map.insert(key.to_string(), json);
            }
            None => tracing::debug!(key, "Skipping non-literal preprocess option"),
        }
    }
    Value::Object(map)
}

fn expr_to_json(expr: &Expr) -> Option<Value> {
    match peel(expr) {
        Expr::Lit(Lit::Str(s)) => s.value.as_str().map(|s| Value::String(s.to_string())),
        Expr::Lit(Lit::Bool(b)) => Some(Value::Bool(b.value)),
        Expr::Lit(Lit::Null(_)) => Some(Value::Null),
        Expr::Lit(Lit::Num(n)) => number(n.value),
        Expr::Unary(unary) if unary.op == UnaryOp::Minus => match peel(&unary.arg) {
            Expr::Lit(Lit::Num(n)) => number(-n.value),
            _ => None,
        },
        Expr::Array(arr) => arr
            .elems
            .iter()
            .map(|elem| match elem {
                Some(elem) if elem.spread.is_none() => expr_to_json(&elem.expr),
                _ => None,
            })
            .collect::<Option<Vec<_>>>()
            .map(Value::Array),
        Expr::Object(obj) => Some(object_to_json(obj)),
        _ => None,
    }
}

fn number(value: f64) -> Option<Value> {
    if value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
        Some(Value::Number(Number::from(value as i64)))
    } else {
        Number::from_f64(value).map(Value::Number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn parse(source: &str) -> SvelteConfig {
        SvelteConfig::parse_source(source, false).unwrap()
    }

    #[test]
    fn test_default_extensions() {
        let config = SvelteConfig::default();
        assert_eq!(config.file_extensions(), vec![".svelte"]);
    }

    #[test]
    fn test_preprocess_call_options() {
        let config = parse(
            r#"
            import sveltePreprocess from 'svelte-preprocess';
            export default {
                extensions: ['.svelte', '.svx'],
                preprocess: sveltePreprocess({
                    typescript: { tsconfigFile: './tsconfig.json' },
                    scss: { prependData: '@use "vars";' },
                    sourceMap: false,
                    replace: [['__DEV__', 'false']],
                    depth: -2,
                    postcss: true,
                }),
            };
            "#,
        );

        assert_eq!(config.file_extensions(), vec![".svelte", ".svx"]);
        assert_eq!(
            config.preprocess,
            Some(json!({
                "typescript": { "tsconfigFile": "./tsconfig.json" },
                "scss": { "prependData": "@use \"vars\";" },
                "sourceMap": false,
                "replace": [["__DEV__", "false"]],
                "depth": -2,
                "postcss": true,
            }))
        );
    }

    #[test]
    fn test_preprocess_array_and_named_export() {
        let config = parse(
            r#"
            import { sveltePreprocess } from 'svelte-preprocess';
            const config = {
                preprocess: [sveltePreprocess({ typescript: true }), mdsvex()],
            };
            export default config;
            "#,
        );
        assert_eq!(config.preprocess, Some(json!({ "typescript": true })));
    }

    #[test]
    fn test_call_without_arguments() {
        let config = parse("export default { preprocess: vitePreprocess() };");
        assert_eq!(config.preprocess, Some(json!({})));
    }

    #[test]
    fn test_dynamic_options_are_skipped() {
        let config = parse(
            r#"
            const dev = process.env.NODE_ENV !== 'production';
            export default {
                preprocess: sveltePreprocess({
                    sourceMap: dev,
                    aliases: [['ts', 'typescript']],
                    markupTagName: 'template',
                }),
            };
            "#,
        );
        assert_eq!(
            config.preprocess,
            Some(json!({
                "aliases": [["ts", "typescript"]],
                "markupTagName": "template",
            }))
        );
    }

    #[test]
    fn test_typescript_config() {
        let config = SvelteConfig::parse_source(
            r#"
            import type { Config } from '@sveltejs/kit';
            const config = {
                preprocess: sveltePreprocess({ typescript: { compilerOptions: { target: 'es2022' } } }),
            } satisfies Config;
            export default config;
            "#,
            true,
        )
        .unwrap();
        assert_eq!(
            config.preprocess,
            Some(json!({ "typescript": { "compilerOptions": { "target": "es2022" } } }))
        );
    }

    #[test]
    fn test_load_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
        fs::write(
            root.join("svelte.config.mjs"),
            "export default { preprocess: sveltePreprocess({ pug: true }) };",
        )
        .unwrap();

        let config = SvelteConfig::load(&root);
        assert_eq!(config.preprocess, Some(json!({ "pug": true })));
    }

    #[test]
    fn test_missing_or_broken_config_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
        assert_eq!(SvelteConfig::load(&root), SvelteConfig::default());

        fs::write(root.join("svelte.config.js"), "export default {").unwrap();
        assert_eq!(SvelteConfig::load(&root), SvelteConfig::default());
    }
}
