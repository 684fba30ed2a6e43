use console::Style;
use slabflow_core::plan::Plan;
use slabflow_core::source::AcquisitionParams;
use slabflow_core::stage::{StageFactory, StageSpec};

struct Styles {
    title: Style,
    header: Style,
    label: Style,
    value: Style,
    method: Style,
    disabled: Style,
    path: Style,
}

impl Styles {
    fn new() -> Self {
        Self {
            title: Style::new().cyan().bold(),
            header: Style::new().cyan().bold(),
            label: Style::new().dim(),
            value: Style::new().bold().white(),
            method: Style::new().green(),
            disabled: Style::new().dim().yellow(),
            path: Style::new().underlined(),
        }
    }
}

fn underline(len: usize) -> String {
    "\u{2550}".repeat(len)
}

fn format_indices(indices: &[usize]) -> String {
    indices
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn print_source_info(name: &str, params: &AcquisitionParams) {
    let s = Styles::new();

    println!();
    println!("  {}", s.title.apply_to(name));
    println!("  {}", s.title.apply_to(underline(name.chars().count())));
    println!();
    println!("  {:<14}{}", s.label.apply_to("Timepoints"), s.value.apply_to(params.nt));
    println!("  {:<14}{}", s.label.apply_to("Channels"), s.value.apply_to(params.nc));
    let waves = params
        .wavelengths
        .iter()
        .map(|w| format!("{w} nm"))
        .collect::<Vec<_>>()
        .join(", ");
    println!("  {:<14}{}", s.label.apply_to("Wavelengths"), s.value.apply_to(waves));
    let [nz, ny, nx] = params.shape;
    println!(
        "  {:<14}{}",
        s.label.apply_to("Volume"),
        s.value.apply_to(format!("{nz} x {ny} x {nx} (ZYX)"))
    );
    println!(
        "  {:<14}{}",
        s.label.apply_to("Spacing"),
        s.value.apply_to(format!("dz {} um, dx {} um", params.dz, params.dx))
    );
    if params.deskew {
        println!(
            "  {:<14}{}",
            s.label.apply_to("Deskew"),
            s.method.apply_to(format!("{} deg", params.angle))
        );
    } else {
        println!("  {:<14}{}", s.label.apply_to("Deskew"), s.disabled.apply_to("no"));
    }
    match params.date {
        Some(date) => println!("  {:<14}{}", s.label.apply_to("Date"), s.value.apply_to(date)),
        None => println!("  {:<14}{}", s.label.apply_to("Date"), s.disabled.apply_to("unknown")),
    }
    if let Some(ref mask) = params.mask {
        println!("  {:<14}{}", s.label.apply_to("Mask"), s.value.apply_to(mask));
    }
    println!();
}

pub fn print_plan_summary(plan: &Plan, title: &str) {
    let s = Styles::new();
    let source = plan.source();

    println!();
    println!("  {}", s.title.apply_to(title));
    println!("  {}", s.title.apply_to(underline(title.chars().count())));
    println!();
    match source.location() {
        Some(path) => println!(
            "  {:<14}{}",
            s.label.apply_to("Source"),
            s.path.apply_to(path.display())
        ),
        None => println!("  {:<14}{}", s.label.apply_to("Source"), s.value.apply_to(source.name())),
    }
    println!(
        "  {:<14}{}",
        s.label.apply_to("Timepoints"),
        s.value.apply_to(format_indices(plan.t_range()))
    );
    println!(
        "  {:<14}{}",
        s.label.apply_to("Channels"),
        s.value.apply_to(format_indices(plan.c_range()))
    );
    println!(
        "  {:<14}{}",
        s.label.apply_to("Device"),
        s.method.apply_to(plan.backend().name())
    );
    println!();

    println!("  {}", s.header.apply_to("Stages"));
    for (i, spec) in plan.specs().iter().enumerate() {
        print_spec(&s, i, spec);
    }
    println!();
}

fn print_spec(s: &Styles, i: usize, spec: &StageSpec) {
    let name = if spec.active {
        s.method.apply_to(spec.name().to_string())
    } else {
        s.disabled.apply_to(format!("{} (inactive)", spec.name()))
    };
    println!("    {}. {}", s.label.apply_to(i + 1), name);
    for (key, value) in &spec.params {
        println!("       {:<12}{}", s.label.apply_to(key), s.value.apply_to(value));
    }
}

pub fn print_stage_list<'a>(factories: impl Iterator<Item = &'a std::sync::Arc<dyn StageFactory>>) {
    let s = Styles::new();

    println!();
    println!("  {}", s.title.apply_to("Built-in stages"));
    println!("  {}", s.title.apply_to(underline(15)));
    for factory in factories {
        println!();
        println!(
            "  {} {}",
            s.header.apply_to(factory.name()),
            s.label.apply_to(format!("[{}]", factory.kind()))
        );
        if !factory.description().is_empty() {
            println!("    {}", factory.description());
        }
        for param in factory.parameters() {
            println!(
                "    {:<14}{:<12}{}",
                s.value.apply_to(param.name),
                s.method.apply_to(param.default.to_value()),
                s.label.apply_to(param.help)
            );
        }
    }
    println!();
}
