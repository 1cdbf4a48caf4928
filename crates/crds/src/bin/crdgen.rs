//! Prints the NVIDIADriver CustomResourceDefinition as YAML.

use crds::NVIDIADriver;
use kube::CustomResourceExt;

fn main() -> Result<(), serde_yaml::Error> {
    print!("{}", serde_yaml::to_string(&NVIDIADriver::crd())?);
    Ok(())
}
