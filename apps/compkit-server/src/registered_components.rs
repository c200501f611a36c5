// Links every component crate so its `inventory` registration is visible to
// `ComponentList::discover()`. Add a line here when adding a component crate.
#![allow(unused_imports)]

use manager_controller as _;
use statistics_storage as _;
