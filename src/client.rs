use serde_json::Value;

use crate::{
    CascadeError,
    cascade::{CascadeEngine, CascadeOptions, DeletionMethod, FilterSuspension},
    query::RootSelection,
    schema::SchemaRegistry,
    store::CascadeStore,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandLineConfig {
    pub database: String,
    pub schema: Option<String>,
    pub command: String,
    pub root: Option<String>,
    pub predicate: Option<String>,
    pub method: DeletionMethod,
    pub exclusions: Vec<String>,
    pub joins: Vec<(String, Vec<String>)>,
    pub global_filters: bool,
}

impl CommandLineConfig {
    pub fn from_args(args: &[&str]) -> Result<Self, String> {
        let mut database = String::from("memory");
        let mut schema = None;
        let mut command = String::from("plan");
        let mut root = None;
        let mut predicate = None;
        let mut method = DeletionMethod::Hard;
        let mut exclusions = Vec::new();
        let mut joins = Vec::new();
        let mut global_filters = false;
        let mut iter = args.iter().skip(1);
        while let Some(arg) = iter.next() {
            match *arg {
                "--db" | "--database" => {
                    database = next_value(&mut iter, "--db")?;
                }
                "--schema" => {
                    schema = Some(next_value(&mut iter, "--schema")?);
                }
                "--command" => {
                    command = next_value(&mut iter, "--command")?;
                }
                "--root" => {
                    root = Some(next_value(&mut iter, "--root")?);
                }
                "--where" => {
                    predicate = Some(next_value(&mut iter, "--where")?);
                }
                "--method" => {
                    method = next_value(&mut iter, "--method")?
                        .parse()
                        .map_err(|e: CascadeError| e.to_string())?;
                }
                "--exclude" => {
                    exclusions.push(next_value(&mut iter, "--exclude")?);
                }
                "--join" => {
                    joins.push(parse_join(&next_value(&mut iter, "--join")?)?);
                }
                "--global-filters" => {
                    global_filters = true;
                }
                other if other.starts_with('-') => {
                    return Err(format!("unknown flag {other}"));
                }
                _ => {
                    command = arg.to_string();
                }
            }
        }
        Ok(Self {
            database,
            schema,
            command,
            root,
            predicate,
            method,
            exclusions,
            joins,
            global_filters,
        })
    }

    pub fn help() -> &'static str {
        "Usage: sqlitecascade --schema FILE --root ENTITY [--db memory|PATH] [--where SQL]\n\
         \x20      [--method hard|soft] [--exclude ENTITY]... [--join ENTITY=rel.rel]...\n\
         \x20      [--global-filters] [plan|preview|run]\n"
    }

    pub fn root_selection(&self) -> Result<RootSelection, String> {
        let root = self
            .root
            .as_deref()
            .ok_or_else(|| "--root is required".to_string())?;
        let selection = RootSelection::new(root);
        Ok(match self.predicate.as_deref() {
            Some(predicate) => selection.filter(predicate),
            None => selection,
        })
    }

    pub fn options(&self) -> CascadeOptions {
        let mut options = CascadeOptions::new().with_method(self.method);
        for entity in &self.exclusions {
            options = options.exclude(entity.as_str());
        }
        for (entity, relations) in &self.joins {
            options = options.with_join(entity.as_str(), relations.as_slice());
        }
        if self.global_filters {
            options = options.with_filter_suspension(FilterSuspension::Global);
        }
        options
    }
}

pub struct CascadeClient<S> {
    registry: SchemaRegistry,
    store: S,
}

impl<S> CascadeClient<S> {
    pub fn new(registry: SchemaRegistry, store: S) -> Self {
        Self { registry, store }
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

impl<S> CascadeClient<S>
where
    S: CascadeStore,
{
    /// Runs `plan`, `preview` or `run` and returns its JSON rendering.
    pub fn execute(
        &self,
        command: &str,
        root: &RootSelection,
        options: &CascadeOptions,
    ) -> Result<Value, CascadeError> {
        let engine = CascadeEngine::new(&self.registry);
        let rendered = match command {
            "plan" => serde_json::to_value(engine.plan(root, options)?),
            "preview" => serde_json::to_value(engine.preview(&self.store, root, options)?),
            "run" => serde_json::to_value(engine.run(&self.store, root, options)?),
            other => {
                return Err(CascadeError::invalid_input(format!(
                    "unknown command {other}, expected plan, preview or run"
                )));
            }
        };
        rendered.map_err(|e| CascadeError::invalid_input(e.to_string()))
    }
}

fn next_value<I, T>(iter: &mut I, flag: &str) -> Result<String, String>
where
    I: Iterator<Item = T>,
    T: AsRef<str>,
{
    iter.next()
        .map(|value| value.as_ref().to_string())
        .ok_or_else(|| format!("{flag} requires a value"))
}

fn parse_join(input: &str) -> Result<(String, Vec<String>), String> {
    let (entity, path) = input
        .split_once('=')
        .ok_or_else(|| format!("--join expects ENTITY=rel.rel, got {input}"))?;
    let relations: Vec<String> = path
        .split('.')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect();
    if entity.trim().is_empty() || relations.is_empty() {
        return Err(format!("--join expects ENTITY=rel.rel, got {input}"));
    }
    Ok((entity.trim().to_string(), relations))
}
