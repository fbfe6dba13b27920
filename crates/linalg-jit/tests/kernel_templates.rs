use anyhow::Result;
use linalg_jit::{
    set_arguments, BindingPolicy, DeviceCapabilities, DeviceClass, FetchPolicy, GeneratorError,
    KernelArg, KernelTemplate, Leaf, NumericType, OperatorKind, RecordingCompiler,
    ReductionParameters, ScalarReductionTemplate, Slot, Statement, StatementNode, StorageId,
    TemplateStatus, VectorAxpyParameters, VectorAxpyTemplate,
};

fn gpu(max_work_group_size: usize) -> DeviceCapabilities {
    DeviceCapabilities {
        local_mem_size: 48 * 1024,
        max_work_group_size,
        max_work_item_sizes: vec![1024, 1024, 64],
        device_class: DeviceClass::Gpu,
        vendor_id: 0x10de,
    }
}

fn vector(id: u64) -> Leaf {
    Leaf::vector(NumericType::Float, StorageId(id), 1024)
}

/// `y = a + b`
fn vector_add() -> Statement {
    Statement::new(vec![
        StatementNode::new(OperatorKind::Assign, vector(2), Slot::Composite(1)),
        StatementNode::new(OperatorKind::Add, vector(0), vector(1)),
    ])
}

fn axpy(simd_width: u32, local_size_0: u32, policy: BindingPolicy) -> VectorAxpyTemplate {
    VectorAxpyTemplate::new(
        VectorAxpyParameters::new(simd_width, local_size_0, 8, FetchPolicy::FromGlobalStrided),
        policy,
    )
}

fn prototype_parameters(source: &str) -> Vec<String> {
    let line = source
        .lines()
        .find(|line| line.starts_with("kernel void"))
        .expect("source declares a kernel");
    let open = line.find('(').expect("prototype has an argument list");
    let close = line.rfind(')').expect("prototype has an argument list");
    line[open + 1..close]
        .split(", ")
        .map(str::to_string)
        .collect()
}

#[test]
fn vector_add_is_valid_and_binds_nine_leaf_arguments() -> Result<()> {
    let statements = [vector_add()];
    let template = axpy(4, 64, BindingPolicy::Shared);
    let device = gpu(1024);

    assert_eq!(template.check_invalid(&statements, &device)?, TemplateStatus::Valid);

    let sources = template.generate("vadd", &statements, &device)?;
    assert_eq!(sources.len(), 1);
    let params = prototype_parameters(&sources[0]);
    assert_eq!(params[0], "unsigned int N");
    assert_eq!(params.len(), 1 + 9);
    assert_eq!(
        params.iter().filter(|param| param.starts_with("global float*")).count(),
        3
    );
    assert!(sources[0].contains(
        "vstore4((vload4(i, obj1 + obj1_start) + vload4(i, obj2 + obj2_start)), i, obj0 + obj0_start);"
    ));
    assert!(sources[0].contains(
        "for (unsigned int i = (N/4)*4 + get_global_id(0); i < N; i += get_global_size(0)) {"
    ));

    let mut compiler = RecordingCompiler::default();
    template.execute("vadd", &mut compiler, &statements, &device)?;
    let launch = &compiler.launches[0];
    assert_eq!(launch.name, "vadd0");
    assert_eq!(launch.arguments.len(), 1 + 9);
    assert_eq!(launch.arguments[0], KernelArg::UInt(1024));
    assert_eq!(
        &launch.arguments[1..4],
        &[KernelArg::Buffer(StorageId(2)), KernelArg::UInt(0), KernelArg::UInt(1)]
    );
    assert_eq!(launch.local_size, [64, 1]);
    assert_eq!(launch.global_size, [512, 1]);
    Ok(())
}

#[test]
fn unsupported_simd_width_is_reported() -> Result<()> {
    let status = axpy(3, 64, BindingPolicy::Shared).check_invalid(&[vector_add()], &gpu(1024))?;
    assert_eq!(status, TemplateStatus::InvalidSimdWidth);
    Ok(())
}

#[test]
fn oversized_work_group_is_reported() -> Result<()> {
    let status = axpy(1, 300, BindingPolicy::Shared).check_invalid(&[vector_add()], &gpu(256))?;
    assert_eq!(status, TemplateStatus::WorkGroupSizeOverflow);
    Ok(())
}

#[test]
fn shared_storage_is_bound_once_across_statements() -> Result<()> {
    let x = vector(7);
    let statements = [
        Statement::new(vec![StatementNode::new(OperatorKind::Assign, vector(1), x)]),
        Statement::new(vec![StatementNode::new(OperatorKind::Assign, vector(2), x)]),
    ];
    let device = gpu(1024);

    for (policy, expected_triples) in [
        (BindingPolicy::Shared, 1),
        (BindingPolicy::Independent, 2),
    ] {
        let template = axpy(1, 64, policy);
        let mut compiler = RecordingCompiler::default();
        template.execute("copy", &mut compiler, &statements, &device)?;

        let bound = &compiler.launches[0].arguments;
        let triples = bound
            .iter()
            .filter(|arg| **arg == KernelArg::Buffer(StorageId(7)))
            .count();
        assert_eq!(triples, expected_triples, "{policy:?}");

        let params = prototype_parameters(&compiler.sources[0]);
        assert_eq!(params.len(), bound.len(), "{policy:?}");
    }
    Ok(())
}

#[test]
fn prototype_and_arguments_stay_in_lock_step() -> Result<()> {
    let Leaf::Vector(strided) = vector(3) else {
        unreachable!()
    };
    let statements = [
        Statement::new(vec![
            StatementNode::new(OperatorKind::InplaceAdd, vector(1), Slot::Composite(1)),
            StatementNode::new(
                OperatorKind::Mult,
                Leaf::host_scalar(NumericType::Float, 2.0),
                Slot::Composite(2),
            ),
            StatementNode::new(
                OperatorKind::ElementMax,
                Leaf::Vector(strided.with_stride(1, 2)),
                Slot::Composite(3),
            ),
            StatementNode::unary(
                OperatorKind::Exp,
                Leaf::implicit_vector(NumericType::Float, 1.0, Some(5), 1024),
            ),
        ]),
        Statement::new(vec![
            StatementNode::new(OperatorKind::Assign, vector(2), Slot::Composite(1)),
            StatementNode::new(
                OperatorKind::Sub,
                vector(1),
                Leaf::scalar(NumericType::Float, StorageId(9)),
            ),
        ]),
    ];
    let template = axpy(1, 64, BindingPolicy::Shared);
    let mut compiler = RecordingCompiler::default();
    template.execute("mix", &mut compiler, &statements, &gpu(1024))?;

    let params = prototype_parameters(&compiler.sources[0]);
    let args = &compiler.launches[0].arguments;
    assert_eq!(params.len(), args.len());
    for (param, arg) in params.iter().zip(args) {
        match arg {
            KernelArg::Buffer(_) => assert!(param.starts_with("global float*"), "{param}"),
            KernelArg::UInt(_) => assert!(param.starts_with("unsigned int"), "{param}"),
            KernelArg::Scalar(_) => assert!(param.starts_with("float "), "{param}"),
        }
    }
    Ok(())
}

#[test]
fn simd_with_strided_operand_is_a_template_mismatch() {
    let Leaf::Vector(x) = vector(0) else {
        unreachable!()
    };
    let statement = Statement::new(vec![StatementNode::new(
        OperatorKind::Assign,
        vector(1),
        Leaf::Vector(x.with_stride(0, 3)),
    )]);
    let err = axpy(4, 64, BindingPolicy::Shared)
        .generate("bad", &[statement], &gpu(1024))
        .expect_err("strided simd access must be rejected");
    assert!(err.is_template_mismatch());
}

#[test]
fn cyclic_statement_fails_instead_of_looping() {
    let statement = Statement::new(vec![
        StatementNode::new(OperatorKind::Assign, vector(0), Slot::Composite(1)),
        StatementNode::new(OperatorKind::Add, Slot::Composite(0), vector(1)),
    ]);
    let template = axpy(1, 64, BindingPolicy::Shared);
    assert!(template.generate("cycle", &[statement.clone()], &gpu(1024)).is_err());

    let looped = Statement::new(vec![StatementNode::new(
        OperatorKind::Add,
        Slot::Composite(0),
        vector(1),
    )]);
    assert!(template.check_invalid(&[looped], &gpu(1024)).is_err());
}

#[test]
fn shared_subtree_is_rejected_under_both_policies() {
    // y = (2*x) + (2*x) with both operands of the sum pointing at node 2.
    let statement = Statement::new(vec![
        StatementNode::new(OperatorKind::Assign, vector(1), Slot::Composite(1)),
        StatementNode::new(OperatorKind::Add, Slot::Composite(2), Slot::Composite(2)),
        StatementNode::new(
            OperatorKind::Mult,
            Leaf::host_scalar(NumericType::Float, 2.0),
            vector(0),
        ),
    ]);
    let statements = [statement];

    for policy in [BindingPolicy::Shared, BindingPolicy::Independent] {
        let mut compiler = RecordingCompiler::default();
        let err = axpy(1, 64, policy)
            .execute("twice", &mut compiler, &statements, &gpu(1024))
            .expect_err("a shared subtree must not be generated");
        assert!(
            matches!(err, GeneratorError::MalformedStatement { .. }),
            "{policy:?}: {err}"
        );
        assert!(compiler.sources.is_empty(), "{policy:?}");
        assert!(compiler.launches.is_empty(), "{policy:?}");

        let mut arguments: Vec<KernelArg> = Vec::new();
        let mut current_arg = 0;
        assert!(
            set_arguments(&statements, policy, &mut arguments, &mut current_arg).is_err(),
            "{policy:?}"
        );
        assert!(arguments.is_empty(), "{policy:?}");
    }
}

#[test]
fn doubling_chain_fails_without_expanding() {
    // Every node adds its successor to itself: 2^n paths over n + 2 nodes.
    let links = 48;
    let mut nodes = vec![StatementNode::new(OperatorKind::Assign, vector(0), Slot::Composite(1))];
    for index in 1..=links {
        nodes.push(StatementNode::new(
            OperatorKind::Add,
            Slot::Composite(index + 1),
            Slot::Composite(index + 1),
        ));
    }
    nodes.push(StatementNode::unary(OperatorKind::Exp, vector(1)));
    let statements = [Statement::new(nodes)];

    let err = axpy(1, 64, BindingPolicy::Shared)
        .generate("chain", &statements, &gpu(1024))
        .expect_err("a doubling chain is not a tree");
    assert!(matches!(err, GeneratorError::MalformedStatement { .. }));
}

#[test]
fn inner_product_runs_in_two_launches() -> Result<()> {
    let statement = Statement::new(vec![
        StatementNode::new(
            OperatorKind::Assign,
            Leaf::scalar(NumericType::Double, StorageId(0)),
            Slot::Composite(1),
        ),
        StatementNode::new(
            OperatorKind::InnerProd,
            Leaf::vector(NumericType::Double, StorageId(1), 4096),
            Leaf::vector(NumericType::Double, StorageId(2), 4096),
        ),
    ]);
    let template = ScalarReductionTemplate::new(
        ReductionParameters::new(1, 128, 32, FetchPolicy::FromGlobalContiguous),
        BindingPolicy::Shared,
        StorageId(100),
    );
    let statements = [statement];
    let device = gpu(1024);
    assert!(template.check_invalid(&statements, &device)?.is_valid());

    let mut compiler = RecordingCompiler::default();
    template.execute("dot", &mut compiler, &statements, &device)?;
    assert_eq!(compiler.sources.len(), 2);
    assert!(compiler.sources[0].contains(
        "unsigned int chunk_size = (N + get_global_size(0) - 1)/get_global_size(0);"
    ));
    assert!(compiler.sources[1].contains("obj0[0] = buf[0];"));

    let names: Vec<&str> = compiler
        .launches
        .iter()
        .map(|launch| launch.name.as_str())
        .collect();
    assert_eq!(names, ["dot0", "dot1"]);
    let first = &compiler.launches[0];
    assert_eq!(
        &first.arguments[..3],
        &[KernelArg::UInt(4096), KernelArg::UInt(32), KernelArg::Buffer(StorageId(100))]
    );
    assert_eq!(first.arguments.len(), 3 + 1 + 3 + 3);
    assert_eq!(first.global_size, [128 * 32, 1]);
    assert_eq!(compiler.launches[1].global_size, [128, 1]);
    assert_eq!(prototype_parameters(&compiler.sources[1]).len(), first.arguments.len());
    Ok(())
}

#[test]
fn reduction_extension_rules_apply_after_device_rules() -> Result<()> {
    let statement = Statement::new(vec![
        StatementNode::new(
            OperatorKind::Assign,
            Leaf::scalar(NumericType::Float, StorageId(0)),
            Slot::Composite(1),
        ),
        StatementNode::unary(OperatorKind::Sum, vector(1)),
    ]);
    let statements = [statement];
    let template = |local_size_0, simd_width| {
        ScalarReductionTemplate::new(
            ReductionParameters::new(simd_width, local_size_0, 4, FetchPolicy::FromGlobalStrided),
            BindingPolicy::Independent,
            StorageId(50),
        )
    };
    assert_eq!(
        template(96, 1).check_invalid(&statements, &gpu(1024))?,
        TemplateStatus::LocalSizeNotPowerOfTwo
    );
    assert_eq!(
        template(96, 5).check_invalid(&statements, &gpu(1024))?,
        TemplateStatus::InvalidSimdWidth
    );
    assert_eq!(
        template(48, 1).check_invalid(&statements, &gpu(1024))?,
        TemplateStatus::LocalSizeNotWarpMultiple
    );
    Ok(())
}
