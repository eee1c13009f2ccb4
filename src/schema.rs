//! The closed vocabulary a selector may use
//!
//! Every attribute and method name a selector can mention is a [`Symbol`]; names outside this
//! set survive parsing as [`Name::Unknown`] and are rejected by the typechecker. The
//! [`Schema`] declares which symbols are legal on which kind of value, with arities and types.

use std::fmt;

macro_rules! symbols {
    ($($variant:ident => $text:literal,)*) => {
        /// Every attribute or method name known to the engine
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Symbol {
            $($variant,)*
        }

        impl Symbol {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Symbol::$variant => $text,)*
                }
            }

            pub fn from_name(name: &str) -> Option<Self> {
                match name {
                    $($text => Some(Symbol::$variant),)*
                    _ => None,
                }
            }
        }
    };
}

symbols! {
    Id => "id",
    Vid => "vid",
    ClassName => "name",
    Text => "text",
    Desc => "desc",
    Clickable => "clickable",
    Focusable => "focusable",
    Checkable => "checkable",
    Checked => "checked",
    Editable => "editable",
    LongClickable => "longClickable",
    VisibleToUser => "visibleToUser",
    Left => "left",
    Top => "top",
    Right => "right",
    Bottom => "bottom",
    Width => "width",
    Height => "height",
    ChildCount => "childCount",
    Index => "index",
    Depth => "depth",
    Parent => "parent",
    Prev => "prev",
    Current => "current",
    Length => "length",
    GetChild => "getChild",
    GetPrev => "getPrev",
    ToInt => "toInt",
    ToString => "toString",
    Or => "or",
    And => "and",
    Not => "not",
    IfElse => "ifElse",
    Plus => "plus",
    Minus => "minus",
    Times => "times",
    Div => "div",
    Rem => "rem",
    More => "more",
    MoreEqual => "moreEqual",
    Less => "less",
    LessEqual => "lessEqual",
    Get => "get",
    At => "at",
    Substring => "substring",
    IndexOf => "indexOf",
    Equal => "equal",
    NotEqual => "notEqual",
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A name as written in selector source, resolved against the vocabulary once at parse time
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Name {
    Symbol(Symbol),
    Unknown(String),
}

impl Name {
    pub fn new(name: &str) -> Self {
        match Symbol::from_name(name) {
            Some(symbol) => Name::Symbol(symbol),
            None => Name::Unknown(name.to_string()),
        }
    }

    pub fn symbol(&self) -> Option<Symbol> {
        match self {
            Name::Symbol(s) => Some(*s),
            Name::Unknown(_) => None,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Name::Symbol(s) => s.as_str(),
            Name::Unknown(s) => s,
        }
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PrimitiveType {
    Boolean,
    Int,
    String,
    Object(&'static str),
}

impl fmt::Display for PrimitiveType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrimitiveType::Boolean => f.write_str("boolean"),
            PrimitiveType::Int => f.write_str("int"),
            PrimitiveType::String => f.write_str("string"),
            PrimitiveType::Object(name) => f.write_str(name),
        }
    }
}

/// Handle to a [`TypeInfo`] registered in a [`Schema`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeId(usize);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropInfo {
    pub name: Symbol,
    pub ty: TypeId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodInfo {
    pub name: Symbol,
    pub return_type: TypeId,
    pub params: Vec<TypeId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeInfo {
    pub kind: PrimitiveType,
    pub props: Vec<PropInfo>,
    pub methods: Vec<MethodInfo>,
}

impl TypeInfo {
    fn new(kind: PrimitiveType) -> Self {
        TypeInfo {
            kind,
            props: Vec::new(),
            methods: Vec::new(),
        }
    }

    pub fn prop(&self, name: Symbol) -> Option<&PropInfo> {
        self.props.iter().find(|p| p.name == name)
    }

    /// Methods with the given name, in declaration order
    pub fn methods_named(&self, name: Symbol) -> impl Iterator<Item = &MethodInfo> {
        self.methods.iter().filter(move |m| m.name == name)
    }
}

/// Arena of mutually referencing type descriptions
///
/// Types refer to each other by [`TypeId`] (a node's `parent` is a node), so the graph is
/// stored flat and built once.
#[derive(Debug, Clone)]
pub struct Schema {
    types: Vec<TypeInfo>,
    pub boolean: TypeId,
    pub int: TypeId,
    pub string: TypeId,
    pub node: TypeId,
    pub context: TypeId,
    /// Type against which bare identifiers and calls are resolved
    pub global: TypeId,
}

impl Schema {
    pub fn get(&self, id: TypeId) -> &TypeInfo {
        &self.types[id.0]
    }

    pub fn name_of(&self, id: TypeId) -> String {
        self.get(id).kind.to_string()
    }

    fn get_mut(&mut self, id: TypeId) -> &mut TypeInfo {
        &mut self.types[id.0]
    }

    fn register(types: &mut Vec<TypeInfo>, kind: PrimitiveType) -> TypeId {
        types.push(TypeInfo::new(kind));
        TypeId(types.len() - 1)
    }

    /// The vocabulary understood by the built-in transforms
    pub fn standard() -> Self {
        let mut types = Vec::new();
        let boolean = Self::register(&mut types, PrimitiveType::Boolean);
        let int = Self::register(&mut types, PrimitiveType::Int);
        let string = Self::register(&mut types, PrimitiveType::String);
        let node = Self::register(&mut types, PrimitiveType::Object("node"));
        let context = Self::register(&mut types, PrimitiveType::Object("context"));
        let global = Self::register(&mut types, PrimitiveType::Object("global"));

        let mut schema = Schema {
            types,
            boolean,
            int,
            string,
            node,
            context,
            global,
        };

        let method = |name, return_type, params: &[TypeId]| MethodInfo {
            name,
            return_type,
            params: params.to_vec(),
        };
        let prop = |name, ty| PropInfo { name, ty };

        // one overload per argument type, all arguments sharing it; without a fixed return
        // type the overload returns its argument type
        let overloads = |name, return_type: Option<TypeId>, arity: usize| {
            [boolean, int, string, node, context]
                .into_iter()
                .map(|ty| method(name, return_type.unwrap_or(ty), &vec![ty; arity]))
                .collect::<Vec<_>>()
        };

        let mut boolean_methods = vec![
            method(Symbol::ToInt, int, &[]),
            method(Symbol::Or, boolean, &[boolean]),
            method(Symbol::And, boolean, &[boolean]),
            method(Symbol::Not, boolean, &[]),
        ];
        boolean_methods.extend(overloads(Symbol::IfElse, None, 2));
        schema.get_mut(boolean).methods = boolean_methods;

        schema.get_mut(int).methods = vec![
            method(Symbol::ToString, string, &[]),
            method(Symbol::ToString, string, &[int]),
            method(Symbol::Plus, int, &[int]),
            method(Symbol::Minus, int, &[int]),
            method(Symbol::Times, int, &[int]),
            method(Symbol::Div, int, &[int]),
            method(Symbol::Rem, int, &[int]),
            method(Symbol::More, boolean, &[int]),
            method(Symbol::MoreEqual, boolean, &[int]),
            method(Symbol::Less, boolean, &[int]),
            method(Symbol::LessEqual, boolean, &[int]),
        ];

        schema.get_mut(string).props = vec![prop(Symbol::Length, int)];
        schema.get_mut(string).methods = vec![
            method(Symbol::Get, string, &[int]),
            method(Symbol::At, string, &[int]),
            method(Symbol::Substring, string, &[int]),
            method(Symbol::Substring, string, &[int, int]),
            method(Symbol::ToInt, int, &[]),
            method(Symbol::ToInt, int, &[int]),
            method(Symbol::IndexOf, int, &[string]),
            method(Symbol::IndexOf, int, &[string, int]),
        ];

        let node_props = vec![
            prop(Symbol::Id, string),
            prop(Symbol::Vid, string),
            prop(Symbol::ClassName, string),
            prop(Symbol::Text, string),
            prop(Symbol::Desc, string),
            prop(Symbol::Clickable, boolean),
            prop(Symbol::Focusable, boolean),
            prop(Symbol::Checkable, boolean),
            prop(Symbol::Checked, boolean),
            prop(Symbol::Editable, boolean),
            prop(Symbol::LongClickable, boolean),
            prop(Symbol::VisibleToUser, boolean),
            prop(Symbol::Left, int),
            prop(Symbol::Top, int),
            prop(Symbol::Right, int),
            prop(Symbol::Bottom, int),
            prop(Symbol::Width, int),
            prop(Symbol::Height, int),
            prop(Symbol::ChildCount, int),
            prop(Symbol::Index, int),
            prop(Symbol::Depth, int),
            prop(Symbol::Parent, node),
        ];
        let node_methods = vec![method(Symbol::GetChild, node, &[int])];

        let mut context_props = node_props.clone();
        context_props.push(prop(Symbol::Prev, context));
        context_props.push(prop(Symbol::Current, node));
        let mut context_methods = node_methods.clone();
        context_methods.push(method(Symbol::GetPrev, context, &[int]));

        let mut global_methods = context_methods.clone();
        global_methods.extend(overloads(Symbol::Equal, Some(boolean), 2));
        global_methods.extend(overloads(Symbol::NotEqual, Some(boolean), 2));

        schema.get_mut(node).props = node_props;
        schema.get_mut(node).methods = node_methods;
        schema.get_mut(global).props = context_props.clone();
        schema.get_mut(global).methods = global_methods;
        schema.get_mut(context).props = context_props;
        schema.get_mut(context).methods = context_methods;

        schema
    }
}

impl Default for Schema {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbol_names_round_trip() {
        for name in ["id", "longClickable", "getChild", "ifElse", "name"] {
            let symbol = Symbol::from_name(name).unwrap();
            assert_eq!(symbol.as_str(), name);
        }
        assert_eq!(Symbol::from_name("nope"), None);
        assert_eq!(Name::new("nope"), Name::Unknown("nope".to_string()));
    }

    #[test]
    fn test_standard_schema_shape() {
        let schema = Schema::standard();
        let global = schema.get(schema.global);
        assert_eq!(
            global.prop(Symbol::Parent).map(|p| p.ty),
            Some(schema.node)
        );
        assert_eq!(
            global.prop(Symbol::Prev).map(|p| p.ty),
            Some(schema.context)
        );
        assert_eq!(global.methods_named(Symbol::Equal).count(), 5);
        assert!(schema.get(schema.node).prop(Symbol::Prev).is_none());
        assert_eq!(schema.get(schema.string).methods_named(Symbol::Substring).count(), 2);
    }
}
