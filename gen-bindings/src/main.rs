use postcard_bindgen::{PackageInfo, generate_bindings, python};

use shared_types::{DiagnosticError, DiagnosticRequest, DiagnosticResponse, FaultCode, PackVerdict};

fn main() {
    python::build_package(
        std::env::current_dir().unwrap().as_path(),
        PackageInfo {
            name: "bevolt-bps-diagnostics".into(),
            version: "0.1.0".try_into().unwrap(),
        },
        python::GenerationSettings::enable_all(),
        generate_bindings!(
            DiagnosticRequest,
            DiagnosticResponse,
            PackVerdict,
            FaultCode,
            DiagnosticError
        ),
    )
    .unwrap();
}
