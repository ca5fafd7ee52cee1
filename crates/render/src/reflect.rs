//! WGSL reflection: parameter-descriptor tables built once per shader program.
//!
//! Only the declarations the binding protocol needs are understood: `struct`
//! declarations, module-scope `var` declarations with `@group`/`@binding`, and entry
//! point attributes. Function bodies are skipped. Uniform blocks are laid out with the
//! uniform address space rules (16-byte aligned structs and arrays, 16-byte array
//! stride), so offsets match what the GPU reads.

use crate::context::ShaderStage;
use std::collections::BTreeMap;
use std::fmt;

const UNIFORM_ALIGN: u32 = 16;
const MAX_NESTING: usize = 16;
/// wgpu's default `max_uniform_buffer_binding_size`.
pub const MAX_UNIFORM_BYTES: u32 = 64 << 10;

#[derive(Debug, thiserror::Error)]
pub enum ReflectError {
    #[error("line {line}: expected {expected}, found `{found}`")]
    Unexpected {
        line: usize,
        expected: &'static str,
        found: String,
    },

    #[error("unexpected end of source, expected {0}")]
    UnexpectedEnd(&'static str),

    #[error("unterminated block comment")]
    UnterminatedComment,

    #[error("unknown type `{0}`")]
    UnknownType(String),

    #[error("type `{0}` is not supported in a uniform block or resource binding")]
    UnsupportedType(String),

    #[error("`@{attribute}` on `{member}` is not supported")]
    UnsupportedAttribute { member: String, attribute: String },

    #[error("`{0}` has an array stride that is not a multiple of 16 bytes")]
    ArrayStride(String),

    #[error("`{member}` starts at byte {offset}, but the struct member before it needs {required}")]
    StructPadding {
        member: String,
        offset: u32,
        required: u32,
    },

    #[error("`{name}` needs {size} bytes, more than the {max} a uniform binding holds")]
    TooLarge { name: String, size: u64, max: u32 },

    #[error("struct `{0}` nests too deeply (recursive?)")]
    Recursive(String),

    #[error("no @{0} entry point")]
    MissingEntryPoint(&'static str),

    #[error("more than one uniform block (`{first}` and `{second}`)")]
    MultipleUniformBlocks { first: String, second: String },

    #[error("`{name}` is in group {group}, this stage uses group {expected}")]
    WrongGroup {
        name: String,
        group: u32,
        expected: u32,
    },

    #[error("`{0}` has no @group/@binding")]
    MissingBinding(String),

    #[error("`{first}` and `{second}` share binding {binding} in group {group}")]
    DuplicateBinding {
        first: String,
        second: String,
        group: u32,
        binding: u32,
    },

    #[error("address space `{0}` is not supported")]
    AddressSpace(String),
}

/// Shape of one uniform parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamKind {
    F32,
    I32,
    U32,
    Vec2,
    Vec3,
    Vec4,
    Mat4,
    Struct(String),
    Array {
        element: Box<ParamKind>,
        count: u32,
        stride: u32,
    },
}

impl ParamKind {
    pub fn describe(&self) -> &'static str {
        match self {
            ParamKind::F32 => "f32",
            ParamKind::I32 => "i32",
            ParamKind::U32 => "u32",
            ParamKind::Vec2 => "vec2<f32>",
            ParamKind::Vec3 => "vec3<f32>",
            ParamKind::Vec4 => "vec4<f32>",
            ParamKind::Mat4 => "mat4x4<f32>",
            ParamKind::Struct(_) => "struct",
            ParamKind::Array { .. } => "array",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParamDesc {
    pub kind: ParamKind,
    /// Byte offset inside the uniform block.
    pub offset: u32,
    pub size: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UniformBlock {
    /// Name of the `var<uniform>`.
    pub name: String,
    pub type_name: String,
    pub group: u32,
    pub binding: u32,
    /// Block size rounded up to 16 bytes.
    pub size: u32,
    pub params: BTreeMap<String, ParamDesc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Texture2d,
    TextureCube,
    DepthTexture2d,
    Sampler,
    ComparisonSampler,
}

impl ResourceKind {
    pub fn is_texture(self) -> bool {
        matches!(
            self,
            ResourceKind::Texture2d | ResourceKind::TextureCube | ResourceKind::DepthTexture2d
        )
    }

    pub fn describe(self) -> &'static str {
        match self {
            ResourceKind::Texture2d => "texture_2d",
            ResourceKind::TextureCube => "texture_cube",
            ResourceKind::DepthTexture2d => "texture_depth_2d",
            ResourceKind::Sampler => "sampler",
            ResourceKind::ComparisonSampler => "sampler_comparison",
        }
    }

    fn from_type(ty: &TypeExpr) -> Result<Self, ReflectError> {
        match ty.name.as_str() {
            "texture_2d" => Ok(ResourceKind::Texture2d),
            "texture_cube" => Ok(ResourceKind::TextureCube),
            "texture_depth_2d" => Ok(ResourceKind::DepthTexture2d),
            "sampler" => Ok(ResourceKind::Sampler),
            "sampler_comparison" => Ok(ResourceKind::ComparisonSampler),
            _ => Err(ReflectError::UnsupportedType(ty.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceSlot {
    pub group: u32,
    pub binding: u32,
    pub kind: ResourceKind,
}

/// Reflected interface of one shader program.
#[derive(Debug, Clone, PartialEq)]
pub struct ShaderLayout {
    pub stage: ShaderStage,
    pub entry_point: String,
    pub uniform: Option<UniformBlock>,
    pub resources: BTreeMap<String, ResourceSlot>,
}

impl ShaderLayout {
    /// Reflect `source` as a program for `stage`.
    pub fn reflect(source: &str, stage: ShaderStage) -> Result<Self, ReflectError> {
        let module = parse_module(source)?;

        let wanted = match stage {
            ShaderStage::Vertex => "vertex",
            ShaderStage::Pixel => "fragment",
        };
        let entry_point = module
            .entry_points
            .iter()
            .find(|(attr, _)| attr == wanted)
            .map(|(_, name)| name.clone())
            .ok_or(ReflectError::MissingEntryPoint(wanted))?;

        let expected_group = stage.bind_group();
        let mut uniform: Option<UniformBlock> = None;
        let mut resources = BTreeMap::new();
        let mut taken: BTreeMap<u32, String> = BTreeMap::new();

        for var in &module.globals {
            let space = var.space.as_deref();
            if matches!(space, Some("private") | Some("workgroup")) {
                continue;
            }
            let (group, binding) = var
                .binding()
                .ok_or_else(|| ReflectError::MissingBinding(var.name.clone()))?;
            if group != expected_group {
                return Err(ReflectError::WrongGroup {
                    name: var.name.clone(),
                    group,
                    expected: expected_group,
                });
            }
            if let Some(first) = taken.insert(binding, var.name.clone()) {
                return Err(ReflectError::DuplicateBinding {
                    first,
                    second: var.name.clone(),
                    group,
                    binding,
                });
            }

            match space {
                Some("uniform") => {
                    if let Some(prev) = &uniform {
                        return Err(ReflectError::MultipleUniformBlocks {
                            first: prev.name.clone(),
                            second: var.name.clone(),
                        });
                    }
                    uniform = Some(uniform_block(var, group, binding, &module.structs)?);
                }
                None => {
                    let kind = ResourceKind::from_type(&var.ty)?;
                    resources.insert(
                        var.name.clone(),
                        ResourceSlot {
                            group,
                            binding,
                            kind,
                        },
                    );
                }
                Some(other) => return Err(ReflectError::AddressSpace(other.to_string())),
            }
        }

        Ok(Self {
            stage,
            entry_point,
            uniform,
            resources,
        })
    }

    pub fn param(&self, name: &str) -> Option<&ParamDesc> {
        self.uniform.as_ref().and_then(|u| u.params.get(name))
    }

    pub fn resource(&self, name: &str) -> Option<&ResourceSlot> {
        self.resources.get(name)
    }

    /// True when `name` is a uniform parameter or a resource slot.
    pub fn declares(&self, name: &str) -> bool {
        self.param(name).is_some() || self.resource(name).is_some()
    }

    /// Uniform block size in bytes, 0 without a block.
    pub fn uniform_size(&self) -> u32 {
        self.uniform.as_ref().map_or(0, |u| u.size)
    }

    pub fn textures(&self) -> impl Iterator<Item = (&str, &ResourceSlot)> {
        self.resources
            .iter()
            .filter(|(_, slot)| slot.kind.is_texture())
            .map(|(name, slot)| (name.as_str(), slot))
    }

    pub fn samplers(&self) -> impl Iterator<Item = (&str, &ResourceSlot)> {
        self.resources
            .iter()
            .filter(|(_, slot)| !slot.kind.is_texture())
            .map(|(name, slot)| (name.as_str(), slot))
    }
}

fn round_up(align: u32, n: u32) -> u32 {
    n.div_ceil(align) * align
}

// ---------------------------------------------------------------------------
// Lexer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Ident(String),
    Number(String),
    Punct(char),
}

impl fmt::Display for Tok {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tok::Ident(s) | Tok::Number(s) => f.write_str(s),
            Tok::Punct(c) => write!(f, "{c}"),
        }
    }
}

#[derive(Debug)]
struct Spanned {
    tok: Tok,
    line: usize,
}

fn tokenize(source: &str) -> Result<Vec<Spanned>, ReflectError> {
    let chars: Vec<char> = source.chars().collect();
    let mut out = Vec::new();
    let mut i = 0;
    let mut line = 1;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        if c == '\n' {
            line += 1;
            i += 1;
        } else if c.is_whitespace() {
            i += 1;
        } else if c == '/' && next == Some('/') {
            while i < chars.len() && chars[i] != '\n' {
                i += 1;
            }
        } else if c == '/' && next == Some('*') {
            // block comments nest in WGSL
            let mut depth = 1;
            i += 2;
            while depth > 0 {
                match (chars.get(i).copied(), chars.get(i + 1).copied()) {
                    (None, _) => return Err(ReflectError::UnterminatedComment),
                    (Some('/'), Some('*')) => {
                        depth += 1;
                        i += 2;
                    }
                    (Some('*'), Some('/')) => {
                        depth -= 1;
                        i += 2;
                    }
                    (Some('\n'), _) => {
                        line += 1;
                        i += 1;
                    }
                    _ => i += 1,
                }
            }
        } else if c.is_ascii_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            out.push(Spanned {
                tok: Tok::Ident(chars[start..i].iter().collect()),
                line,
            });
        } else if c.is_ascii_digit() {
            let start = i;
            while i < chars.len()
                && (chars[i].is_ascii_alphanumeric() || chars[i] == '_' || chars[i] == '.')
            {
                i += 1;
            }
            out.push(Spanned {
                tok: Tok::Number(chars[start..i].iter().collect()),
                line,
            });
        } else {
            out.push(Spanned {
                tok: Tok::Punct(c),
                line,
            });
            i += 1;
        }
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Declarations
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum TypeArg {
    Type(TypeExpr),
    Count(u32),
}

#[derive(Debug, Clone, PartialEq)]
struct TypeExpr {
    name: String,
    args: Vec<TypeArg>,
}

impl fmt::Display for TypeExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        if !self.args.is_empty() {
            f.write_str("<")?;
            for (i, arg) in self.args.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                match arg {
                    TypeArg::Type(t) => write!(f, "{t}")?,
                    TypeArg::Count(n) => write!(f, "{n}")?,
                }
            }
            f.write_str(">")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct Attribute {
    name: String,
    args: Vec<String>,
}

#[derive(Debug, Clone)]
struct Member {
    name: String,
    ty: TypeExpr,
    attrs: Vec<Attribute>,
}

#[derive(Debug, Clone)]
struct GlobalVar {
    name: String,
    space: Option<String>,
    ty: TypeExpr,
    attrs: Vec<Attribute>,
}

impl GlobalVar {
    fn attr_u32(&self, name: &str) -> Option<u32> {
        self.attrs
            .iter()
            .find(|a| a.name == name)
            .and_then(|a| a.args.first())
            .and_then(|arg| parse_count(arg))
    }

    fn binding(&self) -> Option<(u32, u32)> {
        Some((self.attr_u32("group")?, self.attr_u32("binding")?))
    }
}

#[derive(Debug, Default)]
struct Module {
    structs: BTreeMap<String, Vec<Member>>,
    globals: Vec<GlobalVar>,
    /// (stage attribute, function name)
    entry_points: Vec<(String, String)>,
}

fn parse_count(text: &str) -> Option<u32> {
    text.trim_end_matches(['u', 'i']).parse().ok()
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Tok> {
        self.tokens.get(self.pos).map(|s| &s.tok)
    }

    fn peek_punct(&self, c: char) -> bool {
        matches!(self.peek(), Some(Tok::Punct(p)) if *p == c)
    }

    fn eat_punct(&mut self, c: char) -> bool {
        let hit = self.peek_punct(c);
        if hit {
            self.pos += 1;
        }
        hit
    }

    fn bump(&mut self, expected: &'static str) -> Result<Tok, ReflectError> {
        let tok = self
            .tokens
            .get(self.pos)
            .map(|s| s.tok.clone())
            .ok_or(ReflectError::UnexpectedEnd(expected))?;
        self.pos += 1;
        Ok(tok)
    }

    fn unexpected(&self, found: &Tok, expected: &'static str) -> ReflectError {
        let line = self
            .tokens
            .get(self.pos.saturating_sub(1))
            .map_or(0, |s| s.line);
        ReflectError::Unexpected {
            line,
            expected,
            found: found.to_string(),
        }
    }

    fn expect_punct(&mut self, c: char, expected: &'static str) -> Result<(), ReflectError> {
        match self.bump(expected)? {
            Tok::Punct(p) if p == c => Ok(()),
            other => Err(self.unexpected(&other, expected)),
        }
    }

    fn expect_ident(&mut self, expected: &'static str) -> Result<String, ReflectError> {
        match self.bump(expected)? {
            Tok::Ident(s) => Ok(s),
            other => Err(self.unexpected(&other, expected)),
        }
    }

    /// Skip a balanced `open ... close` run starting at the cursor.
    fn skip_balanced(&mut self, open: char, close: char) -> Result<(), ReflectError> {
        self.expect_punct(open, "opening bracket")?;
        let mut depth = 1;
        while depth > 0 {
            match self.bump("closing bracket")? {
                Tok::Punct(c) if c == open => depth += 1,
                Tok::Punct(c) if c == close => depth -= 1,
                _ => {}
            }
        }
        Ok(())
    }

    fn skip_past_semicolon(&mut self) -> Result<(), ReflectError> {
        while !self.eat_punct(';') {
            self.bump("`;`")?;
        }
        Ok(())
    }

    fn attributes(&mut self) -> Result<Vec<Attribute>, ReflectError> {
        let mut attrs = Vec::new();
        while self.eat_punct('@') {
            let name = self.expect_ident("attribute name")?;
            let mut args = Vec::new();
            if self.eat_punct('(') {
                let mut depth = 1;
                let mut current = String::new();
                loop {
                    match self.bump("`)`")? {
                        Tok::Punct('(') => {
                            depth += 1;
                            current.push('(');
                        }
                        Tok::Punct(')') => {
                            depth -= 1;
                            if depth == 0 {
                                break;
                            }
                            current.push(')');
                        }
                        Tok::Punct(',') if depth == 1 => args.push(std::mem::take(&mut current)),
                        tok => current.push_str(&tok.to_string()),
                    }
                }
                if !current.is_empty() {
                    args.push(current);
                }
            }
            attrs.push(Attribute { name, args });
        }
        Ok(attrs)
    }

    fn type_expr(&mut self) -> Result<TypeExpr, ReflectError> {
        let name = self.expect_ident("type")?;
        let mut args = Vec::new();
        if self.eat_punct('<') {
            loop {
                if self.eat_punct('>') {
                    break;
                }
                let count = match self.peek() {
                    Some(Tok::Number(n)) => Some(n.clone()),
                    _ => None,
                };
                match count {
                    Some(n) => {
                        self.pos += 1;
                        let n = parse_count(&n).ok_or_else(|| ReflectError::Unexpected {
                            line: self.tokens[self.pos - 1].line,
                            expected: "array length",
                            found: n.clone(),
                        })?;
                        args.push(TypeArg::Count(n));
                    }
                    None => args.push(TypeArg::Type(self.type_expr()?)),
                }
                if !self.eat_punct(',') {
                    self.expect_punct('>', "`>`")?;
                    break;
                }
            }
        }
        Ok(TypeExpr { name, args })
    }

    fn struct_decl(&mut self) -> Result<(String, Vec<Member>), ReflectError> {
        let name = self.expect_ident("struct name")?;
        self.expect_punct('{', "`{`")?;
        let mut members = Vec::new();
        loop {
            if self.eat_punct('}') {
                break;
            }
            let attrs = self.attributes()?;
            let member = self.expect_ident("member name")?;
            self.expect_punct(':', "`:`")?;
            let ty = self.type_expr()?;
            members.push(Member {
                name: member,
                ty,
                attrs,
            });
            if !self.eat_punct(',') {
                self.expect_punct('}', "`}`")?;
                break;
            }
        }
        self.eat_punct(';');
        Ok((name, members))
    }

    fn global_var(&mut self, attrs: Vec<Attribute>) -> Result<GlobalVar, ReflectError> {
        let mut space = None;
        if self.eat_punct('<') {
            space = Some(self.expect_ident("address space")?);
            while !self.eat_punct('>') {
                self.bump("`>`")?;
            }
        }
        let name = self.expect_ident("variable name")?;
        self.expect_punct(':', "`:`")?;
        let ty = self.type_expr()?;
        self.skip_past_semicolon()?;
        Ok(GlobalVar {
            name,
            space,
            ty,
            attrs,
        })
    }
}

fn parse_module(source: &str) -> Result<Module, ReflectError> {
    let mut p = Parser {
        tokens: tokenize(source)?,
        pos: 0,
    };
    let mut module = Module::default();

    loop {
        let attrs = p.attributes()?;
        let Some(tok) = p.peek().cloned() else {
            break;
        };
        p.pos += 1;
        match tok {
            Tok::Ident(keyword) => match keyword.as_str() {
                "struct" => {
                    let (name, members) = p.struct_decl()?;
                    module.structs.insert(name, members);
                }
                "var" => module.globals.push(p.global_var(attrs)?),
                "fn" => {
                    let name = p.expect_ident("function name")?;
                    for attr in &attrs {
                        if matches!(attr.name.as_str(), "vertex" | "fragment" | "compute") {
                            module.entry_points.push((attr.name.clone(), name.clone()));
                        }
                    }
                    while !p.peek_punct('{') {
                        p.bump("function body")?;
                    }
                    p.skip_balanced('{', '}')?;
                }
                "const" | "override" | "alias" | "enable" | "requires" | "diagnostic"
                | "const_assert" => p.skip_past_semicolon()?,
                _ => return Err(p.unexpected(&Tok::Ident(keyword), "declaration")),
            },
            Tok::Punct(';') => {}
            other => return Err(p.unexpected(&other, "declaration")),
        }
    }
    Ok(module)
}

// ---------------------------------------------------------------------------
// Uniform layout
// ---------------------------------------------------------------------------

struct Layout {
    kind: ParamKind,
    align: u32,
    size: u32,
}

fn generic_f32(ty: &TypeExpr) -> bool {
    matches!(ty.args.as_slice(), [TypeArg::Type(t)] if t.name == "f32" && t.args.is_empty())
}

fn is_builtin_type_name(name: &str) -> bool {
    name == "bool"
        || name == "f16"
        || name.starts_with("vec")
        || name.starts_with("mat")
        || name.starts_with("atomic")
        || name.starts_with("texture")
        || name.starts_with("sampler")
}

fn layout_of(
    ty: &TypeExpr,
    structs: &BTreeMap<String, Vec<Member>>,
    depth: usize,
) -> Result<Layout, ReflectError> {
    if depth > MAX_NESTING {
        return Err(ReflectError::Recursive(ty.name.clone()));
    }
    let plain = ty.args.is_empty();
    let (kind, align, size) = match (ty.name.as_str(), plain || generic_f32(ty)) {
        ("f32", _) if plain => (ParamKind::F32, 4, 4),
        ("i32", _) if plain => (ParamKind::I32, 4, 4),
        ("u32", _) if plain => (ParamKind::U32, 4, 4),
        ("vec2f", _) if plain => (ParamKind::Vec2, 8, 8),
        ("vec3f", _) if plain => (ParamKind::Vec3, 16, 12),
        ("vec4f", _) if plain => (ParamKind::Vec4, 16, 16),
        ("mat4x4f", _) if plain => (ParamKind::Mat4, 16, 64),
        ("vec2", true) if !plain => (ParamKind::Vec2, 8, 8),
        ("vec3", true) if !plain => (ParamKind::Vec3, 16, 12),
        ("vec4", true) if !plain => (ParamKind::Vec4, 16, 16),
        ("mat4x4", true) if !plain => (ParamKind::Mat4, 16, 64),
        ("array", _) => return array_layout(ty, structs, depth),
        (name, _) => {
            return match structs.get(name) {
                Some(members) if plain => struct_layout(name, members, structs, depth).map(|(l, _)| l),
                _ if is_builtin_type_name(name) => Err(ReflectError::UnsupportedType(ty.to_string())),
                _ => Err(ReflectError::UnknownType(ty.to_string())),
            };
        }
    };
    Ok(Layout { kind, align, size })
}

fn array_layout(
    ty: &TypeExpr,
    structs: &BTreeMap<String, Vec<Member>>,
    depth: usize,
) -> Result<Layout, ReflectError> {
    let (element, count) = match ty.args.as_slice() {
        [TypeArg::Type(element), TypeArg::Count(count)] => (element, *count),
        // runtime-sized arrays or lengths given by a constant
        _ => return Err(ReflectError::UnsupportedType(ty.to_string())),
    };
    let e = layout_of(element, structs, depth + 1)?;
    let stride = round_up(e.align, e.size);
    if stride % UNIFORM_ALIGN != 0 {
        return Err(ReflectError::ArrayStride(ty.to_string()));
    }
    let size = u64::from(stride) * u64::from(count);
    if size > u64::from(MAX_UNIFORM_BYTES) {
        return Err(ReflectError::TooLarge {
            name: ty.to_string(),
            size,
            max: MAX_UNIFORM_BYTES,
        });
    }
    Ok(Layout {
        kind: ParamKind::Array {
            element: Box::new(e.kind),
            count,
            stride,
        },
        align: e.align.max(UNIFORM_ALIGN),
        size: size as u32,
    })
}

fn struct_layout(
    name: &str,
    members: &[Member],
    structs: &BTreeMap<String, Vec<Member>>,
    depth: usize,
) -> Result<(Layout, BTreeMap<String, ParamDesc>), ReflectError> {
    let mut params = BTreeMap::new();
    let mut offset = 0;
    let mut align = 4;
    // a member after a struct-typed member must start roundUp(16, size) past it
    let mut struct_end = 0;

    for member in members {
        if let Some(attr) = member
            .attrs
            .iter()
            .find(|a| matches!(a.name.as_str(), "align" | "size"))
        {
            return Err(ReflectError::UnsupportedAttribute {
                member: format!("{name}.{}", member.name),
                attribute: attr.name.clone(),
            });
        }
        let l = layout_of(&member.ty, structs, depth + 1)?;
        let member_align = match l.kind {
            ParamKind::Struct(_) | ParamKind::Array { .. } => l.align.max(UNIFORM_ALIGN),
            _ => l.align,
        };
        offset = round_up(member_align, offset);
        if offset < struct_end {
            return Err(ReflectError::StructPadding {
                member: format!("{name}.{}", member.name),
                offset,
                required: struct_end,
            });
        }
        struct_end = match l.kind {
            ParamKind::Struct(_) => offset + round_up(UNIFORM_ALIGN, l.size),
            _ => 0,
        };
        params.insert(
            member.name.clone(),
            ParamDesc {
                kind: l.kind,
                offset,
                size: l.size,
            },
        );
        offset += l.size;
        align = align.max(member_align);
        if offset > MAX_UNIFORM_BYTES {
            return Err(ReflectError::TooLarge {
                name: name.to_string(),
                size: u64::from(offset),
                max: MAX_UNIFORM_BYTES,
            });
        }
    }

    let layout = Layout {
        kind: ParamKind::Struct(name.to_string()),
        align,
        size: round_up(align, offset),
    };
    Ok((layout, params))
}

fn uniform_block(
    var: &GlobalVar,
    group: u32,
    binding: u32,
    structs: &BTreeMap<String, Vec<Member>>,
) -> Result<UniformBlock, ReflectError> {
    let (size, params) = match structs.get(&var.ty.name) {
        Some(members) if var.ty.args.is_empty() => {
            let (layout, params) = struct_layout(&var.ty.name, members, structs, 0)?;
            (layout.size, params)
        }
        _ => {
            let l = layout_of(&var.ty, structs, 0)?;
            let mut params = BTreeMap::new();
            params.insert(
                var.name.clone(),
                ParamDesc {
                    kind: l.kind,
                    offset: 0,
                    size: l.size,
                },
            );
            (l.size, params)
        }
    };
    Ok(UniformBlock {
        name: var.name.clone(),
        type_name: var.ty.name.clone(),
        group,
        binding,
        size: round_up(UNIFORM_ALIGN, size),
        params,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shaders;

    fn pixel(src: &str) -> Result<ShaderLayout, ReflectError> {
        ShaderLayout::reflect(src, ShaderStage::Pixel)
    }

    #[test]
    fn lit_pixel_program_layout() {
        let layout = pixel(shaders::LIT_PS).unwrap();
        assert_eq!(layout.entry_point, "fs_main");

        let offset = |name: &str| layout.param(name).unwrap().offset;
        assert_eq!(offset("color_tint"), 0);
        assert_eq!(offset("uv_scale"), 16);
        assert_eq!(offset("uv_offset"), 24);
        assert_eq!(offset("camera_position"), 32);
        assert_eq!(offset("roughness"), 44);
        assert_eq!(offset("ambient_color"), 48);
        assert_eq!(offset("time"), 60);
        assert_eq!(offset("light_count"), 64);
        assert_eq!(offset("shadow_light_index"), 68);
        assert_eq!(offset("lights"), 80);

        let lights = layout.param("lights").unwrap();
        assert_eq!(lights.size, 8 * 64);
        assert!(matches!(
            lights.kind,
            ParamKind::Array { count: 8, stride: 64, .. }
        ));
        assert_eq!(layout.uniform_size(), 80 + 512);

        let albedo = layout.resource("albedo").unwrap();
        assert_eq!((albedo.group, albedo.binding), (1, 1));
        assert_eq!(albedo.kind, ResourceKind::Texture2d);
        assert_eq!(
            layout.resource("shadow_map").unwrap().kind,
            ResourceKind::DepthTexture2d
        );
        assert_eq!(
            layout.resource("shadow_sampler").unwrap().kind,
            ResourceKind::ComparisonSampler
        );
        assert_eq!(layout.textures().count(), 2);
        assert_eq!(layout.samplers().count(), 2);
    }

    #[test]
    fn builtin_programs_reflect() {
        for (src, stage) in [
            (shaders::LIT_VS, ShaderStage::Vertex),
            (shaders::SHADOW_VS, ShaderStage::Vertex),
            (shaders::SKY_VS, ShaderStage::Vertex),
            (shaders::SKY_PS, ShaderStage::Pixel),
            (shaders::UNLIT_PS, ShaderStage::Pixel),
        ] {
            let layout = ShaderLayout::reflect(src, stage).unwrap();
            assert_eq!(layout.stage, stage);
        }
        let sky = ShaderLayout::reflect(shaders::SKY_PS, ShaderStage::Pixel).unwrap();
        assert_eq!(
            sky.resource("sky_texture").unwrap().kind,
            ResourceKind::TextureCube
        );
    }

    #[test]
    fn vec3_shares_slot_with_trailing_scalar() {
        let src = "
            struct P { a: vec3<f32>, b: f32, c: vec2f, d: vec3f, e: f32 };
            @group(1) @binding(0) var<uniform> p: P;
            @fragment fn fs_main() -> @location(0) vec4<f32> { return vec4<f32>(p.b); }
        ";
        let layout = pixel(src).unwrap();
        assert_eq!(layout.param("a").unwrap().offset, 0);
        assert_eq!(layout.param("b").unwrap().offset, 12);
        assert_eq!(layout.param("c").unwrap().offset, 16);
        assert_eq!(layout.param("d").unwrap().offset, 32);
        assert_eq!(layout.param("e").unwrap().offset, 44);
        assert_eq!(layout.uniform_size(), 48);
    }

    #[test]
    fn nested_struct_aligns_to_16() {
        let src = "
            struct Inner { x: f32 }
            struct P { a: f32, inner: Inner }
            @group(1) @binding(0) var<uniform> p: P;
            @fragment fn fs_main() -> @location(0) vec4<f32> { return vec4<f32>(1.0); }
        ";
        let layout = pixel(src).unwrap();
        assert_eq!(layout.param("inner").unwrap().offset, 16);
        assert_eq!(
            layout.param("inner").unwrap().kind,
            ParamKind::Struct("Inner".into())
        );
        assert_eq!(layout.uniform_size(), 32);
    }

    #[test]
    fn member_packed_after_small_struct_is_rejected() {
        let src = "
            struct Inner { x: f32 }
            struct P { a: f32, inner: Inner, b: f32 }
            @group(1) @binding(0) var<uniform> p: P;
            @fragment fn fs_main() -> @location(0) vec4<f32> { return vec4<f32>(1.0); }
        ";
        match pixel(src) {
            Err(ReflectError::StructPadding {
                member,
                offset,
                required,
            }) => {
                assert_eq!(member, "P.b");
                assert_eq!((offset, required), (20, 32));
            }
            other => panic!("expected a padding error, got {other:?}"),
        }
    }

    #[test]
    fn member_after_16_byte_struct_is_accepted() {
        let src = "
            struct Inner { x: vec4<f32> }
            struct P { inner: Inner, b: f32 }
            @group(1) @binding(0) var<uniform> p: P;
            @fragment fn fs_main() -> @location(0) vec4<f32> { return vec4<f32>(1.0); }
        ";
        let layout = pixel(src).unwrap();
        assert_eq!(layout.param("b").unwrap().offset, 16);
    }

    #[test]
    fn oversized_array_is_rejected() {
        let src = "
            struct P { data: array<vec4<f32>, 4294967295> }
            @group(1) @binding(0) var<uniform> p: P;
            @fragment fn fs_main() -> @location(0) vec4<f32> { return vec4<f32>(1.0); }
        ";
        match pixel(src) {
            Err(ReflectError::TooLarge { size, max, .. }) => {
                assert_eq!(size, 16 * u64::from(u32::MAX));
                assert_eq!(max, MAX_UNIFORM_BYTES);
            }
            other => panic!("expected a size error, got {other:?}"),
        }
    }

    #[test]
    fn oversized_struct_is_rejected() {
        let src = "
            struct P { a: array<vec4<f32>, 4096>, b: array<vec4<f32>, 4096> }
            @group(1) @binding(0) var<uniform> p: P;
            @fragment fn fs_main() -> @location(0) vec4<f32> { return vec4<f32>(1.0); }
        ";
        assert!(matches!(pixel(src), Err(ReflectError::TooLarge { .. })));
    }

    #[test]
    fn scalar_array_stride_is_rejected() {
        let src = "
            struct P { weights: array<f32, 4> }
            @group(1) @binding(0) var<uniform> p: P;
            @fragment fn fs_main() -> @location(0) vec4<f32> { return vec4<f32>(1.0); }
        ";
        assert!(matches!(pixel(src), Err(ReflectError::ArrayStride(_))));
    }

    #[test]
    fn comments_and_locals_are_ignored() {
        let src = "
            // @group(1) @binding(7) var<uniform> ghost: f32;
            /* outer /* nested */ still comment */
            struct P { tint: vec4<f32> }
            @group(1) @binding(0) var<uniform> p: P;
            @fragment
            fn fs_main() -> @location(0) vec4<f32> {
                var local: vec4<f32> = p.tint;
                if (local.x > 0.5) { local = vec4<f32>(0.0); }
                return local;
            }
        ";
        let layout = pixel(src).unwrap();
        assert_eq!(layout.uniform.as_ref().unwrap().params.len(), 1);
        assert!(layout.declares("tint"));
        assert!(!layout.declares("ghost"));
        assert!(!layout.declares("local"));
    }

    #[test]
    fn bare_uniform_is_its_own_parameter() {
        let src = "
            @group(0) @binding(0) var<uniform> mvp: mat4x4<f32>;
            @vertex fn vs_main(@location(0) p: vec3<f32>) -> @builtin(position) vec4<f32> {
                return mvp * vec4<f32>(p, 1.0);
            }
        ";
        let layout = ShaderLayout::reflect(src, ShaderStage::Vertex).unwrap();
        let mvp = layout.param("mvp").unwrap();
        assert_eq!((mvp.offset, mvp.size), (0, 64));
        assert_eq!(mvp.kind, ParamKind::Mat4);
    }

    #[test]
    fn missing_entry_point() {
        let src = "@vertex fn vs_main() -> @builtin(position) vec4<f32> { return vec4<f32>(0.0); }";
        assert!(matches!(
            pixel(src),
            Err(ReflectError::MissingEntryPoint("fragment"))
        ));
    }

    #[test]
    fn wrong_group_is_rejected() {
        let src = "
            @group(0) @binding(0) var tex: texture_2d<f32>;
            @fragment fn fs_main() -> @location(0) vec4<f32> { return vec4<f32>(1.0); }
        ";
        assert!(matches!(
            pixel(src),
            Err(ReflectError::WrongGroup { group: 0, expected: 1, .. })
        ));
    }

    #[test]
    fn duplicate_binding_is_rejected() {
        let src = "
            @group(1) @binding(1) var a: texture_2d<f32>;
            @group(1) @binding(1) var s: sampler;
            @fragment fn fs_main() -> @location(0) vec4<f32> { return vec4<f32>(1.0); }
        ";
        match pixel(src) {
            Err(ReflectError::DuplicateBinding { first, second, .. }) => {
                assert_eq!(first, "a");
                assert_eq!(second, "s");
            }
            other => panic!("expected duplicate binding, got {other:?}"),
        }
    }

    #[test]
    fn second_uniform_block_is_rejected() {
        let src = "
            @group(1) @binding(0) var<uniform> a: vec4<f32>;
            @group(1) @binding(1) var<uniform> b: vec4<f32>;
            @fragment fn fs_main() -> @location(0) vec4<f32> { return a + b; }
        ";
        assert!(matches!(
            pixel(src),
            Err(ReflectError::MultipleUniformBlocks { .. })
        ));
    }

    #[test]
    fn explicit_layout_attributes_are_rejected() {
        let src = "
            struct P { @align(32) a: f32 }
            @group(1) @binding(0) var<uniform> p: P;
            @fragment fn fs_main() -> @location(0) vec4<f32> { return vec4<f32>(p.a); }
        ";
        assert!(matches!(
            pixel(src),
            Err(ReflectError::UnsupportedAttribute { .. })
        ));
    }

    #[test]
    fn unknown_type_is_named() {
        let src = "
            @group(1) @binding(0) var<uniform> p: Missing;
            @fragment fn fs_main() -> @location(0) vec4<f32> { return vec4<f32>(1.0); }
        ";
        match pixel(src) {
            Err(ReflectError::UnknownType(name)) => assert_eq!(name, "Missing"),
            other => panic!("expected unknown type, got {other:?}"),
        }
    }

    #[test]
    fn unterminated_comment() {
        assert!(matches!(
            pixel("/* never closed"),
            Err(ReflectError::UnterminatedComment)
        ));
    }
}
