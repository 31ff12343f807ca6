//! Remote object definitions.
//!
//! A [`RemoteObject`] declares the functions, properties, signals and
//! enumerations an object exposes, together with the closures that back
//! them. Declarations render to the plain-text listings served for
//! discovery, and the same type tags drive overload resolution.

use std::fmt::Write as _;

use crate::http::variant::{Variant, VariantKind};

pub type FunctionImpl = Box<dyn Fn(&[Variant]) -> Result<Variant, String> + Send + Sync>;
pub type PropertyGetter = Box<dyn Fn() -> Variant + Send + Sync>;
pub type PropertySetter = Box<dyn Fn(Variant) -> Result<(), String> + Send + Sync>;

pub struct FunctionDef {
    pub name: String,
    pub params: Vec<VariantKind>,
    pub returns: Option<VariantKind>,
    pub implementation: FunctionImpl,
}

impl FunctionDef {
    /// Declaration line, e.g. `int add(int,int)` or `reset()`.
    pub fn declaration(&self) -> String {
        let mut out = String::new();
        if let Some(ret) = self.returns {
            let _ = write!(out, "{ret} ");
        }
        let _ = write!(out, "{}", signature(&self.name, &self.params));
        out
    }
}

pub struct PropertyDef {
    pub name: String,
    pub kind: VariantKind,
    pub getter: Option<PropertyGetter>,
    pub setter: Option<PropertySetter>,
}

impl PropertyDef {
    /// Declaration line, e.g. `int count`.
    pub fn declaration(&self) -> String {
        format!("{} {}", self.kind, self.name)
    }
}

pub struct SignalDef {
    pub name: String,
    pub params: Vec<VariantKind>,
}

impl SignalDef {
    pub fn declaration(&self) -> String {
        signature(&self.name, &self.params)
    }

    /// The URI a channel subscribes to for this signal. Parameterless
    /// signals go by bare name; parameterized ones carry their signature
    /// so overloaded names stay distinct.
    pub fn push_uri(&self) -> String {
        if self.params.is_empty() {
            format!("signals/{}", self.name)
        } else {
            format!("signals/{}", signature(&self.name, &self.params))
        }
    }
}

pub struct EnumDef {
    pub name: String,
    pub members: Vec<(String, i64)>,
}

/// `name(type,type)` rendering shared by functions and signals.
pub fn signature(name: &str, params: &[VariantKind]) -> String {
    let types: Vec<&str> = params.iter().map(|k| k.type_name()).collect();
    format!("{}({})", name, types.join(","))
}

/// Why a call could not be resolved to a function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveError {
    UnknownName,
    NoMatch,
    Ambiguous,
}

pub struct RemoteObject {
    name: String,
    functions: Vec<FunctionDef>,
    properties: Vec<PropertyDef>,
    signals: Vec<SignalDef>,
    enums: Vec<EnumDef>,
}

impl RemoteObject {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            functions: Vec::new(),
            properties: Vec::new(),
            signals: Vec::new(),
            enums: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn function(
        mut self,
        name: impl Into<String>,
        params: &[VariantKind],
        returns: Option<VariantKind>,
        implementation: impl Fn(&[Variant]) -> Result<Variant, String> + Send + Sync + 'static,
    ) -> Self {
        self.functions.push(FunctionDef {
            name: name.into(),
            params: params.to_vec(),
            returns,
            implementation: Box::new(implementation),
        });
        self
    }

    pub fn property(
        mut self,
        name: impl Into<String>,
        kind: VariantKind,
        getter: Option<PropertyGetter>,
        setter: Option<PropertySetter>,
    ) -> Self {
        self.properties.push(PropertyDef {
            name: name.into(),
            kind,
            getter,
            setter,
        });
        self
    }

    pub fn signal(mut self, name: impl Into<String>, params: &[VariantKind]) -> Self {
        self.signals.push(SignalDef {
            name: name.into(),
            params: params.to_vec(),
        });
        self
    }

    pub fn enumeration(mut self, name: impl Into<String>, members: &[(&str, i64)]) -> Self {
        self.enums.push(EnumDef {
            name: name.into(),
            members: members
                .iter()
                .map(|(n, v)| (n.to_string(), *v))
                .collect(),
        });
        self
    }

    // ---- lookup ----------------------------------------------------------

    /// Pick the best overload of `name` for the given argument kinds.
    /// Exact kind matches outscore int/double coercions; a tie between
    /// two overloads is an error rather than an arbitrary choice.
    pub fn resolve(&self, name: &str, args: &[VariantKind]) -> Result<&FunctionDef, ResolveError> {
        let mut candidates = self.functions.iter().filter(|f| f.name == name).peekable();
        if candidates.peek().is_none() {
            return Err(ResolveError::UnknownName);
        }
        let mut best: Option<(&FunctionDef, u32)> = None;
        let mut tied = false;
        for func in candidates {
            if func.params.len() != args.len() {
                continue;
            }
            let score: Option<u32> = func
                .params
                .iter()
                .zip(args)
                .map(|(decl, actual)| Variant::match_score(*actual, *decl))
                .sum();
            let Some(score) = score else { continue };
            match best {
                Some((_, s)) if score > s => {
                    best = Some((func, score));
                    tied = false;
                }
                Some((_, s)) if score == s => tied = true,
                Some(_) => {}
                None => best = Some((func, score)),
            }
        }
        match best {
            None => Err(ResolveError::NoMatch),
            Some(_) if tied => Err(ResolveError::Ambiguous),
            Some((func, _)) => Ok(func),
        }
    }

    /// Coerce arguments to a function's declared kinds and call it.
    pub fn invoke(&self, func: &FunctionDef, args: Vec<Variant>) -> Result<Variant, String> {
        let mut coerced = Vec::with_capacity(args.len());
        for (arg, kind) in args.into_iter().zip(&func.params) {
            coerced.push(
                arg.coerce(*kind)
                    .ok_or_else(|| "argument kind mismatch".to_string())?,
            );
        }
        (func.implementation)(&coerced)
    }

    pub fn property_def(&self, name: &str) -> Option<&PropertyDef> {
        self.properties.iter().find(|p| p.name == name)
    }

    pub fn signal_def(&self, name: &str) -> Option<&SignalDef> {
        self.signals.iter().find(|s| s.name == name)
    }

    pub fn enum_def(&self, name: &str) -> Option<&EnumDef> {
        self.enums.iter().find(|e| e.name == name)
    }

    /// Whether a URI is a push URI some signal of this object produces.
    pub fn is_push_uri(&self, uri: &str) -> bool {
        self.signals.iter().any(|s| s.push_uri() == uri)
    }

    // ---- discovery listings ---------------------------------------------

    pub fn list_functions(&self) -> String {
        join_lines(self.functions.iter().map(|f| f.declaration()))
    }

    pub fn list_properties(&self) -> String {
        join_lines(self.properties.iter().map(|p| p.declaration()))
    }

    pub fn list_signals(&self) -> String {
        join_lines(self.signals.iter().map(|s| s.declaration()))
    }

    pub fn list_enums(&self) -> String {
        join_lines(self.enums.iter().map(|e| e.name.clone()))
    }

    /// Members of one enumeration, one `Member value` line each.
    pub fn list_enum_members(&self, name: &str) -> Option<String> {
        let def = self.enum_def(name)?;
        Some(join_lines(
            def.members.iter().map(|(n, v)| format!("{n} {v}")),
        ))
    }
}

fn join_lines(lines: impl Iterator<Item = String>) -> String {
    let mut out = String::new();
    for line in lines {
        out.push_str(&line);
        out.push('\n');
    }
    out
}
