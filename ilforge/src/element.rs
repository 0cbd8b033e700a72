//! Type definitions and the compile steps they generate.
//!
//! A definition is consumed twice: once to declare its keys in the symbol
//! table and once to generate steps. Both passes only read it.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::attributes::{
    FieldAttributes, MethodAttributes, PropertyAttributes, TypeAttributes,
};
use crate::backend::{
    Backend, ConstructorSignature, FieldSignature, MethodSignature, PropertySignature,
};
use crate::error::{BuildError, BuildResult};
use crate::expr::{
    BaseInitializer, ClosureLayout, LambdaBody, TypeEnv, collect_closures,
    compile_constructor_body, compile_method_body,
};
use crate::ir::{Instruction, InstructionBlock, Opcode, emit_block};
use crate::key::{ConstructorKey, FieldKey, ItemKey, MethodKey, PropertyKey, TypeKey};
use crate::metadata::TypeOracle;
use crate::module::BuildOptions;
use crate::reference::{
    ConstructorReference, ExistingConstructor, MethodReference, TypeReference, resolve_all,
};
use crate::schedule::CompileStep;
use crate::table::{
    ConstructorDeclaration, Declaration, FieldDeclaration, MethodDeclaration,
    PropertyDeclaration, SymbolTable, TypeDeclaration,
};

/// Phase of every definition step.
pub const DEFINE_PHASE: u32 = 1;
/// Phase of type finalization; runs after every member is emitted.
pub const FINALIZE_PHASE: u32 = 2;

#[derive(Debug, Clone, PartialEq)]
pub struct FieldDefinition {
    pub name: Arc<str>,
    pub attributes: FieldAttributes,
    pub field_type: TypeReference,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MethodBody {
    /// Raw instructions. `params` exclude the implicit receiver.
    Instructions {
        params: Vec<TypeReference>,
        block: InstructionBlock,
    },
    Lambda(LambdaBody),
    Abstract { params: Vec<TypeReference> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct MethodDefinition {
    pub name: Arc<str>,
    pub attributes: MethodAttributes,
    pub return_type: TypeReference,
    pub body: MethodBody,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConstructorBody {
    Instructions {
        params: Vec<TypeReference>,
        block: InstructionBlock,
    },
    /// Without an explicit base initializer the parameterless constructor
    /// of the base type runs first.
    Lambda {
        body: LambdaBody,
        base: Option<BaseInitializer>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConstructorDefinition {
    pub attributes: MethodAttributes,
    pub body: ConstructorBody,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PropertyDefinition {
    pub name: Arc<str>,
    pub attributes: PropertyAttributes,
    pub property_type: TypeReference,
    pub getter: Option<MethodReference>,
    pub setter: Option<MethodReference>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Member {
    Field(FieldDefinition),
    Method(MethodDefinition),
    Constructor(ConstructorDefinition),
    Property(PropertyDefinition),
}

impl From<FieldDefinition> for Member {
    fn from(field: FieldDefinition) -> Self {
        Member::Field(field)
    }
}

impl From<MethodDefinition> for Member {
    fn from(method: MethodDefinition) -> Self {
        Member::Method(method)
    }
}

impl From<ConstructorDefinition> for Member {
    fn from(ctor: ConstructorDefinition) -> Self {
        Member::Constructor(ctor)
    }
}

impl From<PropertyDefinition> for Member {
    fn from(property: PropertyDefinition) -> Self {
        Member::Property(property)
    }
}

impl FieldDefinition {
    pub fn new(name: &str, attributes: FieldAttributes, field_type: TypeReference) -> Self {
        Self {
            name: Arc::from(name),
            attributes,
            field_type,
        }
    }

    pub fn is_instance(&self) -> bool {
        !self.attributes.contains(FieldAttributes::STATIC)
    }
}

impl MethodDefinition {
    pub fn new(
        name: &str,
        attributes: MethodAttributes,
        return_type: TypeReference,
        body: MethodBody,
    ) -> Self {
        Self {
            name: Arc::from(name),
            attributes,
            return_type,
            body,
        }
    }

    pub fn is_instance(&self) -> bool {
        !self.attributes.contains(MethodAttributes::STATIC)
    }

    /// Parameter types as they appear in the key.
    pub fn params(&self, owner: &TypeKey) -> BuildResult<Vec<TypeReference>> {
        match &self.body {
            MethodBody::Instructions { params, .. } | MethodBody::Abstract { params } => {
                Ok(params.clone())
            }
            MethodBody::Lambda(body) if self.is_instance() => {
                check_receiver(owner, body, &format!("method {}", self.name))?;
                Ok(param_types(&body.params[1..]))
            }
            MethodBody::Lambda(body) => Ok(param_types(&body.params)),
        }
    }
}

impl ConstructorDefinition {
    pub fn new(attributes: MethodAttributes, body: ConstructorBody) -> Self {
        Self { attributes, body }
    }

    pub fn params(&self, owner: &TypeKey) -> BuildResult<Vec<TypeReference>> {
        match &self.body {
            ConstructorBody::Instructions { params, .. } => Ok(params.clone()),
            ConstructorBody::Lambda { body, .. } => {
                check_receiver(owner, body, "constructor")?;
                Ok(param_types(&body.params[1..]))
            }
        }
    }
}

impl PropertyDefinition {
    pub fn new(
        name: &str,
        attributes: PropertyAttributes,
        property_type: TypeReference,
        getter: Option<MethodReference>,
        setter: Option<MethodReference>,
    ) -> Self {
        Self {
            name: Arc::from(name),
            attributes,
            property_type,
            getter,
            setter,
        }
    }
}

fn param_types(params: &[crate::expr::Param]) -> Vec<TypeReference> {
    params.iter().map(|param| param.ty.clone()).collect()
}

fn check_receiver(owner: &TypeKey, body: &LambdaBody, what: &str) -> BuildResult<()> {
    match body.params.first() {
        None => Err(BuildError::structural(format!(
            "{what} of {owner} has no receiver parameter"
        ))),
        Some(this) if this.ty != TypeReference::Key(owner.clone()) => {
            Err(BuildError::structural(format!(
                "receiver `{}` of {what} has type {}, expected {owner}",
                this.name, this.ty
            )))
        }
        Some(_) => Ok(()),
    }
}

/// A type to emit, with all of its members.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeDefinition {
    pub key: TypeKey,
    pub attributes: TypeAttributes,
    pub base: Option<TypeReference>,
    pub interfaces: Vec<TypeReference>,
    pub members: Vec<Member>,
}

impl TypeDefinition {
    pub fn new(name: &str, attributes: TypeAttributes) -> Self {
        Self {
            key: TypeKey::new(name),
            attributes,
            base: None,
            interfaces: Vec::new(),
            members: Vec::new(),
        }
    }

    pub fn with_base(mut self, base: TypeReference) -> Self {
        self.base = Some(base);
        self
    }

    pub fn with_interface(mut self, interface: TypeReference) -> Self {
        self.interfaces.push(interface);
        self
    }

    pub fn with_member(mut self, member: impl Into<Member>) -> Self {
        self.members.push(member.into());
        self
    }

    pub fn field_key(&self, field: &FieldDefinition) -> FieldKey {
        self.key.field(&field.name)
    }

    pub fn method_key(&self, method: &MethodDefinition) -> BuildResult<MethodKey> {
        Ok(self
            .key
            .method(&method.name, method.params(&self.key)?, method.is_instance()))
    }

    pub fn constructor_key(&self, ctor: &ConstructorDefinition) -> BuildResult<ConstructorKey> {
        Ok(self.key.constructor(ctor.params(&self.key)?))
    }

    pub fn property_key(&self, property: &PropertyDefinition) -> PropertyKey {
        self.key.property(&property.name)
    }

    /// Constructor a lambda constructor chains to when none is named.
    fn default_base_initializer(&self) -> BaseInitializer {
        let ctor = match &self.base {
            None => ExistingConstructor::object().into(),
            Some(TypeReference::Key(base)) => base.constructor(Vec::new()).into(),
            Some(base) => ConstructorReference::Existing(ExistingConstructor {
                owner: base.clone(),
                params: Vec::new(),
            }),
        };
        BaseInitializer {
            ctor,
            args: Vec::new(),
        }
    }

    /// Keys of deferred types this type derives from.
    fn supertype_keys(&self) -> BTreeSet<ItemKey> {
        let mut keys = BTreeSet::new();
        for ty in self.base.iter().chain(&self.interfaces) {
            ty.collect_keys(&mut keys);
        }
        keys
    }

    fn lambda_env<'a>(&self, oracle: TypeOracle<'a>, body: &LambdaBody) -> TypeEnv<'a> {
        let mut env = TypeEnv::new(oracle);
        for param in &body.params {
            env.bind(param.name.clone(), param.ty.clone());
        }
        for capture in &body.captures {
            env.bind(capture.name.clone(), capture.ty.clone());
        }
        env
    }
}

/// Something that contributes types to a module.
pub trait ModuleElement {
    /// Adds every key this element defines.
    fn declare(&self, table: SymbolTable) -> BuildResult<SymbolTable>;

    /// Closure types needed by the lambdas in this element's bodies.
    fn closures(&self, oracle: TypeOracle<'_>) -> BuildResult<Vec<TypeDefinition>>;

    /// Type-checks and lowers every body, then packages the work as steps.
    fn compile_steps<B: Backend>(
        &self,
        oracle: TypeOracle<'_>,
        options: &BuildOptions,
    ) -> BuildResult<Vec<CompileStep<B>>>;
}

impl ModuleElement for TypeDefinition {
    fn declare(&self, table: SymbolTable) -> BuildResult<SymbolTable> {
        let mut table = table.declare(
            self.key.clone(),
            Declaration::Type(TypeDeclaration {
                attributes: self.attributes,
                base: self.base.clone(),
                interfaces: self.interfaces.clone(),
            }),
        )?;
        for member in &self.members {
            table = match member {
                Member::Field(field) => table.declare(
                    self.field_key(field),
                    Declaration::Field(FieldDeclaration {
                        attributes: field.attributes,
                        field_type: field.field_type.clone(),
                    }),
                )?,
                Member::Method(method) => table.declare(
                    self.method_key(method)?,
                    Declaration::Method(MethodDeclaration {
                        attributes: method.attributes,
                        return_type: method.return_type.clone(),
                    }),
                )?,
                Member::Constructor(ctor) => table.declare(
                    self.constructor_key(ctor)?,
                    Declaration::Constructor(ConstructorDeclaration {
                        attributes: ctor.attributes,
                    }),
                )?,
                Member::Property(property) => table.declare(
                    self.property_key(property),
                    Declaration::Property(PropertyDeclaration {
                        attributes: property.attributes,
                        property_type: property.property_type.clone(),
                        getter: property.getter.clone(),
                        setter: property.setter.clone(),
                    }),
                )?,
            };
        }
        Ok(table)
    }

    fn closures(&self, oracle: TypeOracle<'_>) -> BuildResult<Vec<TypeDefinition>> {
        let mut layouts = Vec::new();
        for member in &self.members {
            match member {
                Member::Method(MethodDefinition {
                    body: MethodBody::Lambda(body),
                    ..
                }) => {
                    layouts.extend(collect_closures(&body.body, &self.lambda_env(oracle, body))?);
                }
                Member::Constructor(ConstructorDefinition {
                    body: ConstructorBody::Lambda { body, base },
                    ..
                }) => {
                    let env = self.lambda_env(oracle, body);
                    for arg in base.iter().flat_map(|base| &base.args) {
                        layouts.extend(collect_closures(arg, &env)?);
                    }
                    layouts.extend(collect_closures(&body.body, &env)?);
                }
                _ => {}
            }
        }
        Ok(layouts.iter().map(closure_type).collect())
    }

    fn compile_steps<B: Backend>(
        &self,
        oracle: TypeOracle<'_>,
        options: &BuildOptions,
    ) -> BuildResult<Vec<CompileStep<B>>> {
        let mut steps = vec![self.define_type_step()];
        let mut bodies = Vec::new();
        for member in &self.members {
            match member {
                Member::Field(field) => steps.push(self.field_step(field)),
                Member::Method(method) => {
                    let key = self.method_key(method)?;
                    steps.push(self.method_step(&key, method)?);
                    let block = match &method.body {
                        MethodBody::Instructions { block, .. } => Some(block.clone()),
                        MethodBody::Lambda(body) => Some(compile_method_body(
                            oracle,
                            options,
                            body,
                            &method.return_type,
                        )?),
                        MethodBody::Abstract { .. } => None,
                    };
                    if let Some(block) = block {
                        bodies.push(method_body_step(key, block));
                    }
                }
                Member::Constructor(ctor) => {
                    let key = self.constructor_key(ctor)?;
                    steps.push(self.constructor_step(&key, ctor)?);
                    let block = match &ctor.body {
                        ConstructorBody::Instructions { block, .. } => block.clone(),
                        ConstructorBody::Lambda { body, base } => {
                            let base = match base {
                                Some(base) => base.clone(),
                                None => self.default_base_initializer(),
                            };
                            compile_constructor_body(oracle, options, body, &base)?
                        }
                    };
                    bodies.push(constructor_body_step(key, block));
                }
                Member::Property(property) => steps.push(self.property_step(property)),
            }
        }
        steps.extend(bodies);
        steps.push(self.finalize_step());
        Ok(steps)
    }
}

// ── step builders ──────────────────────────────────────────────────

fn single(key: impl Into<ItemKey>) -> BTreeSet<ItemKey> {
    BTreeSet::from([key.into()])
}

impl TypeDefinition {
    fn define_type_step<B: Backend>(&self) -> CompileStep<B> {
        let key = self.key.clone();
        let attributes = self.attributes;
        let base = self.base.clone();
        let interfaces = self.interfaces.clone();
        CompileStep::new(
            DEFINE_PHASE,
            format!("define type {key}"),
            self.supertype_keys(),
            single(key.clone()),
            move |backend: &mut B, slots| {
                let base = base.map(|base| base.resolve(backend, slots)).transpose()?;
                let interfaces = resolve_all(&interfaces, backend, slots)?;
                let handle =
                    backend.define_type(key.name(), attributes, base.as_ref(), &interfaces)?;
                slots.write_type(&key, handle)
            },
        )
    }

    fn member_inputs<'a>(&self, types: impl IntoIterator<Item = &'a TypeReference>) -> BTreeSet<ItemKey> {
        let mut inputs = single(self.key.clone());
        for ty in types {
            ty.collect_keys(&mut inputs);
        }
        inputs
    }

    fn field_step<B: Backend>(&self, field: &FieldDefinition) -> CompileStep<B> {
        let key = self.field_key(field);
        let field = field.clone();
        CompileStep::new(
            DEFINE_PHASE,
            format!("define field {key}"),
            self.member_inputs([&field.field_type]),
            single(key.clone()),
            move |backend: &mut B, slots| {
                let owner = slots.ty(&key.owner)?;
                let field_type = field.field_type.resolve(backend, slots)?;
                let handle = backend.define_field(
                    &owner,
                    FieldSignature {
                        name: field.name,
                        attributes: field.attributes,
                        field_type,
                    },
                )?;
                slots.write_field(&key, handle)
            },
        )
    }

    fn method_step<B: Backend>(
        &self,
        key: &MethodKey,
        method: &MethodDefinition,
    ) -> BuildResult<CompileStep<B>> {
        let key = key.clone();
        let mut attributes = method.attributes;
        if !key.is_instance {
            attributes |= MethodAttributes::STATIC;
        }
        if matches!(method.body, MethodBody::Abstract { .. }) {
            attributes |= MethodAttributes::ABSTRACT;
        }
        let return_type = method.return_type.clone();
        Ok(CompileStep::new(
            DEFINE_PHASE,
            format!("define method {key}"),
            self.member_inputs(key.params.iter().chain([&return_type])),
            single(key.clone()),
            move |backend: &mut B, slots| {
                let owner = slots.ty(&key.owner)?;
                let params = resolve_all(&key.params, backend, slots)?;
                let return_type = return_type.resolve(backend, slots)?;
                let handle = backend.define_method(
                    &owner,
                    MethodSignature {
                        name: key.name.clone(),
                        attributes,
                        params,
                        return_type,
                    },
                )?;
                slots.write_method(&key, handle)
            },
        ))
    }

    fn constructor_step<B: Backend>(
        &self,
        key: &ConstructorKey,
        ctor: &ConstructorDefinition,
    ) -> BuildResult<CompileStep<B>> {
        let key = key.clone();
        let attributes = ctor.attributes | MethodAttributes::SPECIAL_NAME;
        Ok(CompileStep::new(
            DEFINE_PHASE,
            format!("define constructor {key}"),
            self.member_inputs(&key.params),
            single(key.clone()),
            move |backend: &mut B, slots| {
                let owner = slots.ty(&key.owner)?;
                let params = resolve_all(&key.params, backend, slots)?;
                let handle = backend
                    .define_constructor(&owner, ConstructorSignature { attributes, params })?;
                slots.write_constructor(&key, handle)
            },
        ))
    }

    fn property_step<B: Backend>(&self, property: &PropertyDefinition) -> CompileStep<B> {
        let key = self.property_key(property);
        let property = property.clone();
        let mut inputs = self.member_inputs([&property.property_type]);
        for accessor in property.getter.iter().chain(&property.setter) {
            accessor.collect_keys(&mut inputs);
        }
        CompileStep::new(
            DEFINE_PHASE,
            format!("define property {key}"),
            inputs,
            single(key.clone()),
            move |backend: &mut B, slots| {
                let owner = slots.ty(&key.owner)?;
                let property_type = property.property_type.resolve(backend, slots)?;
                let getter = property
                    .getter
                    .map(|getter| getter.resolve(backend, slots))
                    .transpose()?;
                let setter = property
                    .setter
                    .map(|setter| setter.resolve(backend, slots))
                    .transpose()?;
                let handle = backend.define_property(
                    &owner,
                    PropertySignature {
                        name: property.name,
                        attributes: property.attributes,
                        property_type,
                        getter,
                        setter,
                    },
                )?;
                slots.write_property(&key, handle)
            },
        )
    }

    fn finalize_step<B: Backend>(&self) -> CompileStep<B> {
        let key = self.key.clone();
        let mut inputs = single(key.clone());
        for supertype in self.supertype_keys() {
            if let ItemKey::Type(supertype) = supertype {
                inputs.insert(supertype.completed().into());
            }
        }
        CompileStep::new(
            FINALIZE_PHASE,
            format!("finalize type {key}"),
            inputs,
            single(key.completed()),
            move |backend: &mut B, slots| {
                let handle = slots.ty(&key)?;
                let completed = backend.finalize_type(&handle)?;
                slots.write_completed(&key.completed(), completed)
            },
        )
    }
}

fn body_inputs(member: ItemKey, block: &InstructionBlock) -> BTreeSet<ItemKey> {
    let mut inputs = block.references();
    inputs.insert(member);
    inputs
}

fn method_body_step<B: Backend>(key: MethodKey, block: InstructionBlock) -> CompileStep<B> {
    CompileStep::new(
        DEFINE_PHASE,
        format!("emit body of {key}"),
        body_inputs(key.clone().into(), &block),
        BTreeSet::new(),
        move |backend: &mut B, slots| {
            let method = slots.method(&key)?;
            let mut body = backend.begin_body();
            emit_block(backend, slots, &mut body, &block)?;
            backend.method_body(&method, body)
        },
    )
}

fn constructor_body_step<B: Backend>(
    key: ConstructorKey,
    block: InstructionBlock,
) -> CompileStep<B> {
    CompileStep::new(
        DEFINE_PHASE,
        format!("emit body of {key}"),
        body_inputs(key.clone().into(), &block),
        BTreeSet::new(),
        move |backend: &mut B, slots| {
            let ctor = slots.constructor(&key)?;
            let mut body = backend.begin_body();
            emit_block(backend, slots, &mut body, &block)?;
            backend.constructor_body(&ctor, body)
        },
    )
}

// ── closures ───────────────────────────────────────────────────────

/// The sealed type a lambda compiles to.
pub fn closure_type(layout: &ClosureLayout) -> TypeDefinition {
    let mut code = vec![
        Instruction::LoadArg(0),
        Instruction::CallConstructor(ExistingConstructor::object().into()),
    ];
    let mut definition = TypeDefinition::new(layout.key.name(), TypeAttributes::SEALED);
    for (index, (name, ty)) in layout.captures.iter().enumerate() {
        let field = layout.field(name);
        definition = definition.with_member(FieldDefinition::new(
            &field.name,
            FieldAttributes::PRIVATE,
            TypeReference::cell(ty.clone()),
        ));
        code.extend([
            Instruction::LoadArg(0),
            Instruction::LoadArg(index as u16 + 1),
            Instruction::StoreField(field.into()),
        ]);
    }
    code.push(Instruction::Op(Opcode::Ret));
    definition
        .with_member(ConstructorDefinition::new(
            MethodAttributes::PUBLIC,
            ConstructorBody::Instructions {
                params: layout.cell_types(),
                block: InstructionBlock::new(Vec::new(), code),
            },
        ))
        .with_member(MethodDefinition::new(
            crate::expr::INVOKE,
            MethodAttributes::PUBLIC | MethodAttributes::FINAL,
            layout.return_type.clone(),
            MethodBody::Lambda(layout.invoke_body()),
        ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{BinaryOp, Expr, Param};
    use crate::metadata::BuiltinMetadata;
    use crate::schedule::plan;
    use crate::symbol::{Symbol, SymbolGenerator};
    use crate::testing::RecordingBackend;

    fn acc() -> TypeKey {
        TypeKey::new("Acc")
    }

    fn this() -> Param {
        Param::new("this", TypeReference::Key(acc()))
    }

    fn accumulator() -> TypeDefinition {
        let acc = acc();
        TypeDefinition::new("Acc", TypeAttributes::PUBLIC | TypeAttributes::SEALED)
            .with_member(FieldDefinition::new(
                "a",
                FieldAttributes::PRIVATE,
                TypeReference::i32(),
            ))
            .with_member(ConstructorDefinition::new(
                MethodAttributes::PUBLIC,
                ConstructorBody::Lambda {
                    body: LambdaBody::new(
                        vec![this(), Param::new("a", TypeReference::i32())],
                        Expr::set_field(Expr::var("this"), acc.field("a"), Expr::var("a")),
                    ),
                    base: None,
                },
            ))
            .with_member(MethodDefinition::new(
                "scale",
                MethodAttributes::PUBLIC,
                TypeReference::i32(),
                MethodBody::Lambda(LambdaBody::new(
                    vec![this(), Param::new("i", TypeReference::i32())],
                    Expr::binary(
                        BinaryOp::Mul,
                        Expr::var("i"),
                        Expr::field(Expr::var("this"), acc.field("a")),
                    ),
                )),
            ))
    }

    fn options() -> BuildOptions {
        BuildOptions {
            symbols: SymbolGenerator::isolated(),
            ..BuildOptions::default()
        }
    }

    #[test]
    fn declare_adds_every_member_key() {
        let definition = accumulator();
        let table = definition.declare(SymbolTable::new()).unwrap();
        assert_eq!(table.len(), 4);
        assert!(table.ty(&acc()).is_some());
        assert!(table.field(&acc().field("a")).is_some());
        assert!(table.constructor(&acc().constructor(vec![TypeReference::i32()])).is_some());
        assert!(table
            .method(&acc().method("scale", vec![TypeReference::i32()], true))
            .is_some());

        let err = definition.declare(table).unwrap_err();
        assert!(matches!(err, BuildError::Declaration { .. }));
    }

    #[test]
    fn instance_lambda_needs_a_receiver() {
        let definition = TypeDefinition::new("Acc", TypeAttributes::PUBLIC).with_member(
            MethodDefinition::new(
                "get",
                MethodAttributes::PUBLIC,
                TypeReference::i32(),
                MethodBody::Lambda(LambdaBody::new(vec![], Expr::i32(1))),
            ),
        );
        let err = definition.declare(SymbolTable::new()).unwrap_err();
        assert!(matches!(err, BuildError::Structural { .. }));

        let static_method = TypeDefinition::new("Acc", TypeAttributes::PUBLIC).with_member(
            MethodDefinition::new(
                "get",
                MethodAttributes::PUBLIC | MethodAttributes::STATIC,
                TypeReference::i32(),
                MethodBody::Lambda(LambdaBody::new(vec![], Expr::i32(1))),
            ),
        );
        assert!(static_method.declare(SymbolTable::new()).is_ok());
    }

    #[test]
    fn constructor_lambda_needs_a_receiver() {
        let definition = TypeDefinition::new("Acc", TypeAttributes::PUBLIC).with_member(
            ConstructorDefinition::new(
                MethodAttributes::PUBLIC,
                ConstructorBody::Lambda {
                    body: LambdaBody::new(vec![], Expr::begin(vec![])),
                    base: None,
                },
            ),
        );
        let err = definition.declare(SymbolTable::new()).unwrap_err();
        assert!(matches!(err, BuildError::Structural { .. }));
    }

    #[test]
    fn steps_are_generated_in_definition_order() {
        let definition = accumulator();
        let table = definition.declare(SymbolTable::new()).unwrap();
        let metadata = BuiltinMetadata::new();
        let steps: Vec<CompileStep<RecordingBackend>> = definition
            .compile_steps(TypeOracle::new(&table, &metadata), &options())
            .unwrap();
        let descriptions: Vec<_> = steps.iter().map(|s| s.description.as_str()).collect();
        assert_eq!(
            descriptions,
            vec![
                "define type Acc",
                "define field Acc::a",
                "define constructor Acc::.ctor(i32)",
                "define method Acc::scale(i32)",
                "emit body of Acc::.ctor(i32)",
                "emit body of Acc::scale(i32)",
                "finalize type Acc",
            ]
        );
        assert_eq!(steps[6].phase, FINALIZE_PHASE);
        assert!(steps[5].inputs.contains(&ItemKey::Field(acc().field("a"))));
        assert!(steps[5].outputs.is_empty());
        assert_eq!(plan(&steps).unwrap(), (0..7).collect::<Vec<_>>());
    }

    #[test]
    fn type_errors_surface_before_any_step_exists() {
        let definition = TypeDefinition::new("Acc", TypeAttributes::PUBLIC).with_member(
            MethodDefinition::new(
                "bad",
                MethodAttributes::STATIC,
                TypeReference::i32(),
                MethodBody::Lambda(LambdaBody::new(
                    vec![],
                    Expr::if_(Expr::bool(true), Expr::i32(1), Expr::string("x")),
                )),
            ),
        );
        let table = definition.declare(SymbolTable::new()).unwrap();
        let metadata = BuiltinMetadata::new();
        let err = definition
            .compile_steps::<RecordingBackend>(TypeOracle::new(&table, &metadata), &options())
            .unwrap_err();
        assert!(matches!(err, BuildError::Type { .. }));
    }

    #[test]
    fn derived_type_finalizes_after_its_base() {
        let derived = TypeDefinition::new("Derived", TypeAttributes::PUBLIC)
            .with_base(TypeReference::new_type("Base"));
        let table = SymbolTable::new();
        let metadata = BuiltinMetadata::new();
        let steps: Vec<CompileStep<RecordingBackend>> = derived
            .compile_steps(TypeOracle::new(&table, &metadata), &options())
            .unwrap();
        assert!(steps[0].inputs.contains(&ItemKey::Type(TypeKey::new("Base"))));
        assert!(steps[1]
            .inputs
            .contains(&ItemKey::CompletedType(TypeKey::new("Base").completed())));
    }

    #[test]
    fn closure_type_stores_cells_and_invokes_lambda() {
        let symbols = SymbolGenerator::isolated();
        let table = SymbolTable::new();
        let metadata = BuiltinMetadata::new();
        let lambda = Expr::lambda(&symbols, vec![], Expr::var("n"));
        let env = TypeEnv::new(TypeOracle::new(&table, &metadata))
            .with(Symbol::new("n"), TypeReference::i32());
        let layouts = collect_closures(&lambda, &env).unwrap();
        let closure = closure_type(&layouts[0]);

        assert_eq!(closure.attributes, TypeAttributes::SEALED);
        assert_eq!(closure.members.len(), 3);
        let Member::Field(field) = &closure.members[0] else {
            panic!("expected the capture field first");
        };
        assert_eq!(field.field_type, TypeReference::cell(TypeReference::i32()));
        let Member::Constructor(ConstructorDefinition {
            body: ConstructorBody::Instructions { params, block },
            ..
        }) = &closure.members[1]
        else {
            panic!("expected an instruction constructor");
        };
        assert_eq!(params, &vec![TypeReference::cell(TypeReference::i32())]);
        assert_eq!(block.instructions.len(), 6);
        block.validate().unwrap();
        let Member::Method(invoke) = &closure.members[2] else {
            panic!("expected Invoke");
        };
        assert!(invoke.is_instance());
        assert_eq!(invoke.return_type, TypeReference::i32());
    }

    #[test]
    fn lambda_bodies_yield_closure_types() {
        let symbols = SymbolGenerator::isolated();
        let ret = TypeReference::delegate(vec![], TypeReference::i32());
        let definition = TypeDefinition::new("Maker", TypeAttributes::PUBLIC).with_member(
            MethodDefinition::new(
                "make",
                MethodAttributes::STATIC,
                ret,
                MethodBody::Lambda(LambdaBody::new(
                    vec![Param::new("n", TypeReference::i32())],
                    Expr::lambda(&symbols, vec![], Expr::var("n")),
                )),
            ),
        );
        let table = definition.declare(SymbolTable::new()).unwrap();
        let metadata = BuiltinMetadata::new();
        let closures = definition
            .closures(TypeOracle::new(&table, &metadata))
            .unwrap();
        assert_eq!(closures.len(), 1);
        assert!(closures[0].key.name().starts_with("<closure>"));
    }
}
