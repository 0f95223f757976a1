//! Test CLI commands
#[cfg(test)]
use serial_test::serial;

#[cfg(test)]
#[serial]
mod test_cli {
    use std::process::Command;

    #[test]
    fn test_help() {
        let output = Command::new("cargo")
            .arg("run")
            .arg("--")
            .arg("--help")
            .output()
            .unwrap_or_else(|err| panic!("Failed to execute: {err}"));

        assert!(
            output.status.success(),
            "Failed to execute command: stdout: {}; stderr: {}",
            String::from_utf8(output.stdout).unwrap(),
            String::from_utf8(output.stderr).unwrap()
        );
    }

    #[test]
    fn test_cli_verify_safe_program() {
        let output = Command::new("cargo")
            .arg("run")
            .arg("--")
            .arg("verify")
            .arg("./tests/resources/safe_count.json")
            .output()
            .unwrap_or_else(|err| panic!("Failed to execute: {err}"));

        let stdout = String::from_utf8(output.stdout).unwrap();
        assert!(
            output.status.success(),
            "Failed to execute command: stdout: {}; stderr: {}",
            stdout,
            String::from_utf8(output.stderr).unwrap()
        );
        assert!(stdout.contains("The program is safe"));
    }

    #[test]
    fn test_cli_verify_unsafe_program() {
        let output = Command::new("cargo")
            .arg("run")
            .arg("--")
            .arg("verify")
            .arg("./tests/resources/unsafe_count.json")
            .output()
            .unwrap_or_else(|err| panic!("Failed to execute: {err}"));

        let stdout = String::from_utf8(output.stdout).unwrap();
        assert!(
            output.status.success(),
            "Failed to execute command: stdout: {}; stderr: {}",
            stdout,
            String::from_utf8(output.stderr).unwrap()
        );
        assert!(stdout.contains("The program is unsafe"));
    }

    #[test]
    fn test_cli_verify_impact_global() {
        let output = Command::new("cargo")
            .arg("run")
            .arg("--")
            .arg("verify")
            .arg("./tests/resources/safe_count.json")
            .arg("--strategy")
            .arg("impact")
            .arg("--refiner")
            .arg("global")
            .output()
            .unwrap_or_else(|err| panic!("Failed to execute: {err}"));

        let stdout = String::from_utf8(output.stdout).unwrap();
        assert!(
            output.status.success(),
            "Failed to execute command: stdout: {}; stderr: {}",
            stdout,
            String::from_utf8(output.stderr).unwrap()
        );
        assert!(stdout.contains("The program is safe"));
    }

    #[test]
    fn test_cli_show_program() {
        let output = Command::new("cargo")
            .arg("run")
            .arg("--")
            .arg("show")
            .arg("./tests/resources/unsafe_count.json")
            .output()
            .unwrap_or_else(|err| panic!("Failed to execute: {err}"));

        let stdout = String::from_utf8(output.stdout).unwrap();
        assert!(
            output.status.success(),
            "Failed to execute command: stdout: {}; stderr: {}",
            stdout,
            String::from_utf8(output.stderr).unwrap()
        );
        assert!(stdout.contains("cfa unsafe_count"));
    }
}
