//! The build entry point: declare, synthesize closures, generate steps and
//! run them.

use std::collections::BTreeMap;

use crate::backend::Backend;
use crate::element::{ModuleElement, TypeDefinition};
use crate::error::{BuildError, BuildResult};
use crate::key::{CompletedTypeKey, ItemKey, TypeKey};
use crate::metadata::{TypeMetadata, TypeOracle};
use crate::slot::SlotTable;
use crate::symbol::SymbolGenerator;
use crate::table::SymbolTable;

/// Knobs for one build.
#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Largest dispatch table a switch may lower to.
    pub max_switch_cases: usize,
    /// Prefix calls in tail position with `tail.`.
    pub tail_calls: bool,
    /// Source of compiler-generated labels and temporaries.
    pub symbols: SymbolGenerator,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            max_switch_cases: 256,
            tail_calls: true,
            symbols: SymbolGenerator::global(),
        }
    }
}

/// Everything one build will emit.
#[derive(Debug, Clone, Default)]
pub struct Module {
    types: Vec<TypeDefinition>,
}

pub struct BuiltModule<B: Backend> {
    pub slots: SlotTable<B>,
    pub table: SymbolTable,
    /// Step descriptions in execution order.
    pub executed: Vec<String>,
}

impl<B: Backend> BuiltModule<B> {
    pub fn completed(&self, key: &TypeKey) -> BuildResult<B::CompletedType> {
        self.slots.completed(&key.completed())
    }

    pub fn completed_types(&self) -> BTreeMap<CompletedTypeKey, B::CompletedType> {
        self.slots
            .completed_types()
            .map(|(key, handle)| (key.clone(), handle))
            .collect()
    }
}

impl Module {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_type(&mut self, definition: TypeDefinition) -> &mut Self {
        self.types.push(definition);
        self
    }

    pub fn with_type(mut self, definition: TypeDefinition) -> Self {
        self.types.push(definition);
        self
    }

    pub fn types(&self) -> &[TypeDefinition] {
        &self.types
    }

    /// Declares every type and the closure types their lambdas need.
    ///
    /// Returns the table and the full list of definitions, closures last.
    pub fn declare(
        &self,
        metadata: &dyn TypeMetadata,
    ) -> BuildResult<(SymbolTable, Vec<TypeDefinition>)> {
        let mut table = SymbolTable::new();
        for definition in &self.types {
            table = definition.declare(table)?;
        }

        let mut closures: BTreeMap<TypeKey, TypeDefinition> = BTreeMap::new();
        for definition in &self.types {
            for closure in definition.closures(TypeOracle::new(&table, metadata))? {
                match closures.get(&closure.key) {
                    Some(existing) if *existing != closure => {
                        return Err(BuildError::Declaration {
                            key: ItemKey::Type(closure.key),
                        });
                    }
                    Some(_) => {}
                    None => {
                        closures.insert(closure.key.clone(), closure);
                    }
                }
            }
        }
        let mut definitions = self.types.clone();
        for closure in closures.into_values() {
            table = closure.declare(table)?;
            definitions.push(closure);
        }
        Ok((table, definitions))
    }

    pub fn build<B: Backend>(
        &self,
        backend: &mut B,
        metadata: &dyn TypeMetadata,
        options: &BuildOptions,
    ) -> BuildResult<BuiltModule<B>> {
        let (table, definitions) = self.declare(metadata)?;
        let oracle = TypeOracle::new(&table, metadata);
        let mut steps = Vec::new();
        for definition in &definitions {
            steps.extend(definition.compile_steps::<B>(oracle, options)?);
        }
        log::debug!(
            "{} types ({} closures), {} keys, {} steps",
            definitions.len(),
            definitions.len() - self.types.len(),
            table.len(),
            steps.len()
        );

        let mut slots = SlotTable::new();
        let executed = crate::schedule::execute(backend, &mut slots, steps)?;
        log::info!(
            "built {} types in {} steps",
            definitions.len(),
            executed.len()
        );
        Ok(BuiltModule {
            slots,
            table,
            executed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::{FieldAttributes, MethodAttributes, TypeAttributes};
    use crate::element::{
        ConstructorBody, ConstructorDefinition, FieldDefinition, MethodBody, MethodDefinition,
    };
    use crate::expr::{BinaryOp, Expr, LambdaBody, Param};
    use crate::metadata::BuiltinMetadata;
    use crate::reference::{ExistingMethod, TypeReference};
    use crate::testing::{RecordingBackend, init_logging};

    fn options() -> BuildOptions {
        BuildOptions {
            symbols: SymbolGenerator::isolated(),
            ..BuildOptions::default()
        }
    }

    fn print() -> ExistingMethod {
        ExistingMethod::new_static(
            TypeReference::named("Console"),
            "WriteLine",
            vec![TypeReference::string()],
            TypeReference::void(),
        )
    }

    /// `Program.main` creates two `Greeter`s; `Program` comes first.
    fn greeting_module() -> Module {
        let greeter = TypeKey::new("Greeter");
        let this = Param::new("this", TypeReference::Key(greeter.clone()));
        let ctor = greeter.constructor(vec![TypeReference::string()]);
        let say = greeter.method("say", vec![], true);
        let program = TypeDefinition::new("Program", TypeAttributes::PUBLIC).with_member(
            MethodDefinition::new(
                "main",
                MethodAttributes::PUBLIC | MethodAttributes::STATIC,
                TypeReference::void(),
                MethodBody::Lambda(LambdaBody::new(
                    vec![],
                    Expr::begin(vec![
                        Expr::call(
                            Expr::new_object(ctor.clone(), vec![Expr::string("Hello, world!")]),
                            say.clone(),
                            vec![],
                        ),
                        Expr::call(
                            Expr::new_object(ctor, vec![Expr::string("This is a test!")]),
                            say,
                            vec![],
                        ),
                    ]),
                )),
            ),
        );
        let greeter_type = TypeDefinition::new("Greeter", TypeAttributes::PUBLIC)
            .with_member(FieldDefinition::new(
                "text",
                FieldAttributes::PRIVATE | FieldAttributes::INIT_ONLY,
                TypeReference::string(),
            ))
            .with_member(ConstructorDefinition::new(
                MethodAttributes::PUBLIC,
                ConstructorBody::Lambda {
                    body: LambdaBody::new(
                        vec![this.clone(), Param::new("text", TypeReference::string())],
                        Expr::set_field(
                            Expr::var("this"),
                            greeter.field("text"),
                            Expr::var("text"),
                        ),
                    ),
                    base: None,
                },
            ))
            .with_member(MethodDefinition::new(
                "say",
                MethodAttributes::PUBLIC,
                TypeReference::void(),
                MethodBody::Lambda(LambdaBody::new(
                    vec![this],
                    Expr::call_static(
                        print(),
                        vec![Expr::field(Expr::var("this"), greeter.field("text"))],
                    ),
                )),
            ));
        Module::new().with_type(program).with_type(greeter_type)
    }

    #[test]
    fn forward_references_wait_for_their_producers() {
        init_logging();
        let mut backend = RecordingBackend::default();
        let built = greeting_module()
            .build(&mut backend, &BuiltinMetadata::new(), &options())
            .unwrap();
        let position = |event: &str| {
            backend
                .events
                .iter()
                .position(|e| e == event)
                .unwrap_or_else(|| panic!("missing event {event}"))
        };
        assert!(position("body Program::main") > position("define constructor Greeter::.ctor(string)"));
        assert!(position("body Program::main") > position("define method Greeter::say() -> void"));
        assert!(position("finalize Program") > position("body Greeter::say"));
        assert_eq!(built.completed_types().len(), 2);
        assert_eq!(
            built.completed(&TypeKey::new("Greeter")).unwrap().0,
            "Greeter!"
        );

        assert_eq!(
            backend.body("Program::main").unwrap(),
            &[
                "ldstr \"Hello, world!\"",
                "newobj Greeter::.ctor",
                "callvirt Greeter::say",
                "ldstr \"This is a test!\"",
                "newobj Greeter::.ctor",
                "tail. callvirt Greeter::say",
                "ret",
            ]
        );
    }

    #[test]
    fn missing_member_is_a_type_error_before_anything_is_emitted() {
        let ghost = TypeKey::new("Ghost");
        let module = Module::new().with_type(
            TypeDefinition::new("Program", TypeAttributes::PUBLIC).with_member(
                MethodDefinition::new(
                    "main",
                    MethodAttributes::STATIC,
                    TypeReference::void(),
                    MethodBody::Lambda(LambdaBody::new(
                        vec![],
                        Expr::call_static(ghost.method("boo", vec![], false), vec![]),
                    )),
                ),
            ),
        );
        let mut backend = RecordingBackend::default();
        let err = module
            .build(&mut backend, &BuiltinMetadata::new(), &options())
            .err()
            .unwrap();
        assert!(matches!(err, BuildError::Type { .. }));
        assert!(backend.events.is_empty());
    }

    #[test]
    fn duplicate_type_is_a_declaration_error() {
        let module = Module::new()
            .with_type(TypeDefinition::new("A", TypeAttributes::PUBLIC))
            .with_type(TypeDefinition::new("A", TypeAttributes::SEALED));
        let mut backend = RecordingBackend::default();
        let err = module
            .build(&mut backend, &BuiltinMetadata::new(), &options())
            .err()
            .unwrap();
        assert!(matches!(err, BuildError::Declaration { .. }));
    }

    #[test]
    fn base_type_outside_the_module_cannot_be_scheduled() {
        let module = Module::new().with_type(
            TypeDefinition::new("Derived", TypeAttributes::PUBLIC)
                .with_base(TypeReference::new_type("Missing")),
        );
        let mut backend = RecordingBackend::default();
        let err = module
            .build(&mut backend, &BuiltinMetadata::new(), &options())
            .err()
            .unwrap();
        assert!(matches!(err, BuildError::Scheduling { phase: 1, .. }));
    }

    #[test]
    fn closures_are_declared_and_built() {
        let symbols = SymbolGenerator::isolated();
        let adder = TypeReference::delegate(vec![TypeReference::i32()], TypeReference::i32());
        let module = Module::new().with_type(
            TypeDefinition::new("Program", TypeAttributes::PUBLIC).with_member(
                MethodDefinition::new(
                    "adder",
                    MethodAttributes::STATIC,
                    adder,
                    MethodBody::Lambda(LambdaBody::new(
                        vec![Param::new("n", TypeReference::i32())],
                        Expr::lambda(
                            &symbols,
                            vec![Param::new("x", TypeReference::i32())],
                            Expr::binary(BinaryOp::Add, Expr::var("x"), Expr::var("n")),
                        ),
                    )),
                ),
            ),
        );
        let mut backend = RecordingBackend::default();
        let built = module
            .build(&mut backend, &BuiltinMetadata::new(), &options())
            .unwrap();
        assert_eq!(built.completed_types().len(), 2);
        let closure = built
            .table
            .iter()
            .find_map(|(key, _)| match key {
                ItemKey::Type(key) if key.name().starts_with("<closure>") => Some(key.clone()),
                _ => None,
            })
            .unwrap();
        let invoke = format!("{closure}::Invoke");
        let body = backend.body(&invoke).unwrap();
        assert_eq!(
            body,
            &[
                "ldarg 1",
                "ldarg 0",
                format!("ldfld {closure}::n").as_str(),
                "ldcell i32",
                "add",
                "ret",
            ]
        );
    }

    #[test]
    fn building_twice_is_structurally_identical() {
        let first = greeting_module();
        let second = first.clone();
        let metadata = BuiltinMetadata::new();
        let (table_a, _) = first.declare(&metadata).unwrap();
        let (table_b, _) = second.declare(&metadata).unwrap();
        assert_eq!(table_a, table_b);

        let mut a = RecordingBackend::default();
        let mut b = RecordingBackend::default();
        first.build(&mut a, &metadata, &options()).unwrap();
        second.build(&mut b, &metadata, &options()).unwrap();
        assert_eq!(a.events, b.events);
        assert_eq!(a.bodies, b.bodies);
    }
}
