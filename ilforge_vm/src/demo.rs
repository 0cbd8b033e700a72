//! Small modules that exercise the compiler end to end.

use ilforge::attributes::{FieldAttributes, MethodAttributes, TypeAttributes};
use ilforge::expr::{BinaryOp, Expr, LambdaBody, Param};
use ilforge::ir::{Instruction, InstructionBlock, Opcode};
use ilforge::{
    BuildOptions, BuildResult, ConstructorBody, ConstructorDefinition, ExistingConstructor,
    ExistingMethod, FieldDefinition, MethodBody, MethodDefinition, Module, Symbol,
    SymbolGenerator, TypeDefinition, TypeKey, TypeReference,
};

use crate::backend::VmBackend;
use crate::error::Error;
use crate::interpreter::Interpreter;
use crate::natives::{self, EXCEPTION};
use crate::program::Program;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Scenario {
    /// `new Acc(100, 10).combine(3, 8)`
    Accumulator,
    /// Two greeters, declared after the type that uses them.
    Greeting,
    Closures,
    Switch,
    /// Nested protected regions built from raw instructions.
    Exceptions,
    /// Self recursion far deeper than the frame limit.
    Countdown,
}

impl Scenario {
    pub const ALL: [Scenario; 6] = [
        Scenario::Accumulator,
        Scenario::Greeting,
        Scenario::Closures,
        Scenario::Switch,
        Scenario::Exceptions,
        Scenario::Countdown,
    ];

    pub fn module(self, symbols: &SymbolGenerator) -> Module {
        match self {
            Scenario::Accumulator => accumulator(),
            Scenario::Greeting => greeting(),
            Scenario::Closures => closures(symbols),
            Scenario::Switch => switch(),
            Scenario::Exceptions => exceptions(),
            Scenario::Countdown => countdown(),
        }
    }

    /// Type, method and arguments the scenario starts from.
    pub fn entry(self) -> (&'static str, &'static str, Vec<Value>) {
        match self {
            Scenario::Countdown => ("Program", "count", vec![Value::I32(10_000), Value::I32(0)]),
            _ => ("Program", "main", Vec::new()),
        }
    }
}

pub struct Outcome {
    pub program: Program,
    /// Step descriptions in execution order.
    pub steps: Vec<String>,
    pub result: Value,
    pub output: Vec<String>,
}

/// Builds `module` into a fresh program.
pub fn build(module: &Module, options: &BuildOptions) -> BuildResult<(Program, Vec<String>)> {
    let mut backend = VmBackend::new();
    let built = module.build(&mut backend, &natives::metadata(), options)?;
    Ok((backend.into_program(), built.executed))
}

pub fn run(scenario: Scenario, options: &BuildOptions, echo: bool) -> Result<Outcome, Error> {
    let (program, steps) = build(&scenario.module(&options.symbols), options)?;
    let (type_name, method, args) = scenario.entry();
    let (result, output) = {
        let mut interpreter = Interpreter::new(&program);
        if echo {
            interpreter = interpreter.echoing();
        }
        let result = interpreter.run_static(type_name, method, args)?;
        (result, interpreter.output().to_vec())
    };
    log::info!("{scenario:?} returned {result:?}");
    Ok(Outcome {
        program,
        steps,
        result,
        output,
    })
}

fn static_method(name: &str, return_type: TypeReference, body: LambdaBody) -> MethodDefinition {
    MethodDefinition::new(
        name,
        MethodAttributes::PUBLIC | MethodAttributes::STATIC,
        return_type,
        MethodBody::Lambda(body),
    )
}

fn write_line(param: TypeReference) -> ExistingMethod {
    ExistingMethod::new_static(
        TypeReference::named(natives::CONSOLE),
        "WriteLine",
        vec![param],
        TypeReference::void(),
    )
}

fn accumulator() -> Module {
    let acc = TypeKey::new("Acc");
    let this = Param::new("this", TypeReference::Key(acc.clone()));
    let i32_ty = TypeReference::i32;
    let combine = acc.method("combine", vec![i32_ty(), i32_ty()], true);
    let field = |name: &str| Expr::field(Expr::var("this"), acc.field(name));

    let acc_type = TypeDefinition::new("Acc", TypeAttributes::PUBLIC | TypeAttributes::SEALED)
        .with_member(FieldDefinition::new("a", FieldAttributes::PRIVATE, i32_ty()))
        .with_member(FieldDefinition::new("b", FieldAttributes::PRIVATE, i32_ty()))
        .with_member(ConstructorDefinition::new(
            MethodAttributes::PUBLIC,
            ConstructorBody::Lambda {
                body: LambdaBody::new(
                    vec![
                        this.clone(),
                        Param::new("a", i32_ty()),
                        Param::new("b", i32_ty()),
                    ],
                    Expr::begin(vec![
                        Expr::set_field(Expr::var("this"), acc.field("a"), Expr::var("a")),
                        Expr::set_field(Expr::var("this"), acc.field("b"), Expr::var("b")),
                    ]),
                ),
                base: None,
            },
        ))
        .with_member(MethodDefinition::new(
            "combine",
            MethodAttributes::PUBLIC,
            i32_ty(),
            MethodBody::Lambda(LambdaBody::new(
                vec![this, Param::new("i", i32_ty()), Param::new("j", i32_ty())],
                Expr::binary(
                    BinaryOp::Add,
                    Expr::binary(BinaryOp::Mul, Expr::var("i"), field("a")),
                    Expr::binary(BinaryOp::Mul, Expr::var("j"), field("b")),
                ),
            )),
        ));

    let program = TypeDefinition::new("Program", TypeAttributes::PUBLIC).with_member(
        static_method(
            "main",
            i32_ty(),
            LambdaBody::new(
                vec![],
                Expr::call(
                    Expr::new_object(
                        acc.constructor(vec![i32_ty(), i32_ty()]),
                        vec![Expr::i32(100), Expr::i32(10)],
                    ),
                    combine,
                    vec![Expr::i32(3), Expr::i32(8)],
                ),
            ),
        ),
    );
    Module::new().with_type(acc_type).with_type(program)
}

fn greeting() -> Module {
    let greeter = TypeKey::new("Greeter");
    let this = Param::new("this", TypeReference::Key(greeter.clone()));
    let ctor = greeter.constructor(vec![TypeReference::string()]);
    let say = greeter.method("Greet", vec![], true);
    let greet = |text: &str| {
        Expr::call(
            Expr::new_object(ctor.clone(), vec![Expr::string(text)]),
            say.clone(),
            vec![],
        )
    };
    let program = TypeDefinition::new("Program", TypeAttributes::PUBLIC).with_member(
        static_method(
            "main",
            TypeReference::void(),
            LambdaBody::new(
                vec![],
                Expr::begin(vec![greet("Hello, world!"), greet("This is a test!")]),
            ),
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
                    Expr::set_field(Expr::var("this"), greeter.field("text"), Expr::var("text")),
                ),
                base: None,
            },
        ))
        .with_member(MethodDefinition::new(
            "Greet",
            MethodAttributes::PUBLIC,
            TypeReference::void(),
            MethodBody::Lambda(LambdaBody::new(
                vec![this],
                Expr::call_static(
                    write_line(TypeReference::string()),
                    vec![Expr::field(Expr::var("this"), greeter.field("text"))],
                ),
            )),
        ));
    Module::new().with_type(program).with_type(greeter_type)
}

/// A counter mutated through its capture cell, and a curried adder.
fn closures(symbols: &SymbolGenerator) -> Module {
    let i32_ty = TypeReference::i32;
    let adder_ty = TypeReference::delegate(vec![i32_ty()], i32_ty());
    let make_adder = TypeKey::new("Program").method("make_adder", vec![i32_ty()], false);

    let counter = Expr::let_(
        vec![(Symbol::new("count"), Expr::i32(0))],
        Expr::let_(
            vec![(
                Symbol::new("inc"),
                Expr::lambda(
                    symbols,
                    vec![],
                    Expr::begin(vec![
                        Expr::assign(
                            "count",
                            Expr::binary(BinaryOp::Add, Expr::var("count"), Expr::i32(1)),
                        ),
                        Expr::var("count"),
                    ]),
                ),
            )],
            Expr::begin(vec![
                Expr::invoke(Expr::var("inc"), vec![]),
                Expr::invoke(Expr::var("inc"), vec![]),
                Expr::invoke(Expr::var("inc"), vec![]),
            ]),
        ),
    );
    let adder = Expr::lambda(
        symbols,
        vec![Param::new("x", i32_ty())],
        Expr::binary(BinaryOp::Add, Expr::var("x"), Expr::var("n")),
    );
    let main = Expr::binary(
        BinaryOp::Add,
        Expr::binary(BinaryOp::Mul, counter, Expr::i32(100)),
        Expr::invoke(
            Expr::call_static(make_adder, vec![Expr::i32(5)]),
            vec![Expr::i32(37)],
        ),
    );

    let program = TypeDefinition::new("Program", TypeAttributes::PUBLIC)
        .with_member(static_method("main", i32_ty(), LambdaBody::new(vec![], main)))
        .with_member(static_method(
            "make_adder",
            adder_ty,
            LambdaBody::new(vec![Param::new("n", i32_ty())], adder),
        ));
    Module::new().with_type(program)
}

/// Classifies 0..=6 through a sparse dispatch table.
fn switch() -> Module {
    let classify = TypeKey::new("Program").method("classify", vec![TypeReference::u32()], false);
    let table = Expr::switch(
        Expr::var("n"),
        vec![
            (vec![0], Expr::string("zero")),
            (vec![1, 3, 5], Expr::string("odd")),
            (vec![2, 4], Expr::string("even")),
        ],
        Expr::string("many"),
    );
    let main = Expr::begin(
        (0..=6)
            .map(|n| {
                Expr::call_static(
                    write_line(TypeReference::string()),
                    vec![Expr::call_static(classify.clone(), vec![Expr::u32(n)])],
                )
            })
            .collect(),
    );
    let program = TypeDefinition::new("Program", TypeAttributes::PUBLIC)
        .with_member(static_method(
            "classify",
            TypeReference::string(),
            LambdaBody::new(vec![Param::new("n", TypeReference::u32())], table),
        ))
        .with_member(static_method("main", TypeReference::void(), LambdaBody::new(vec![], main)));
    Module::new().with_type(program)
}

fn exceptions() -> Module {
    let exception = TypeReference::named(EXCEPTION);
    let inner = Symbol::new("inner");
    let outer = Symbol::new("outer");
    let print = |text: &str| {
        [
            Instruction::LoadString(text.into()),
            Instruction::Call {
                method: write_line(TypeReference::string()).into(),
                tail: false,
            },
        ]
    };
    let mut code = vec![
        Instruction::BeginTry { end: outer.clone() },
        Instruction::BeginTry { end: inner.clone() },
        Instruction::LoadString("boom".into()),
        Instruction::NewObject(
            ExistingConstructor {
                owner: exception.clone(),
                params: vec![TypeReference::string()],
            }
            .into(),
        ),
        Instruction::Op(Opcode::Throw),
        Instruction::BeginCatch(exception.clone()),
        Instruction::Call {
            method: ExistingMethod::new_instance(
                exception,
                "get_Message",
                vec![],
                TypeReference::string(),
            )
            .into(),
            tail: false,
        },
        Instruction::Call {
            method: write_line(TypeReference::string()).into(),
            tail: false,
        },
        Instruction::Leave(inner.clone()),
        Instruction::EndTry { end: inner },
    ];
    code.extend(print("after catch"));
    code.push(Instruction::Leave(outer.clone()));
    code.push(Instruction::BeginFinally);
    code.extend(print("finally"));
    code.push(Instruction::EndTry { end: outer });
    code.push(Instruction::Op(Opcode::Ret));

    let program = TypeDefinition::new("Program", TypeAttributes::PUBLIC).with_member(
        MethodDefinition::new(
            "main",
            MethodAttributes::PUBLIC | MethodAttributes::STATIC,
            TypeReference::void(),
            MethodBody::Instructions {
                params: Vec::new(),
                block: InstructionBlock::new(Vec::new(), code),
            },
        ),
    );
    Module::new().with_type(program)
}

fn countdown() -> Module {
    let i32_ty = TypeReference::i32;
    let count = TypeKey::new("Program").method("count", vec![i32_ty(), i32_ty()], false);
    let body = Expr::if_(
        Expr::binary(BinaryOp::Eq, Expr::var("n"), Expr::i32(0)),
        Expr::var("acc"),
        Expr::call_static(
            count,
            vec![
                Expr::binary(BinaryOp::Sub, Expr::var("n"), Expr::i32(1)),
                Expr::binary(BinaryOp::Add, Expr::var("acc"), Expr::i32(1)),
            ],
        ),
    );
    let program = TypeDefinition::new("Program", TypeAttributes::PUBLIC).with_member(
        static_method(
            "count",
            i32_ty(),
            LambdaBody::new(
                vec![Param::new("n", i32_ty()), Param::new("acc", i32_ty())],
                body,
            ),
        ),
    );
    Module::new().with_type(program)
}
