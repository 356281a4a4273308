//! Native methods of the JVM class `org.georust.proj.PJ`.
//!
//! The Java object keeps its handle in `long ptr`; zero means released. Static methods
//! allocate and return a handle, instance methods read it from `this`. The backend is
//! chosen once per process from the environment (see [`Config::from_env`]).
//!
//! Queries return `null` or NaN when the handle is missing. Only `transform` throws.

use jni::JNIEnv;
use jni::objects::{JClass, JDoubleArray, JObject, JString, JValue, ReleaseMode};
use jni::sys::{jboolean, jcharArray, jdouble, jint, jlong, jobject, jsize, jstring};
use std::ffi::c_void;
use std::ptr::{self, NonNull};
use std::sync::{Arc, OnceLock};

use crate::backend::{Backend, RawHandle};
use crate::config::Config;
use crate::handle::{HandleSlot, release_slot};
use crate::pj::{Pj, PjRef};
use crate::transform::{self, PreparedTransform, TransformError};

const PTR_FIELD: &str = "ptr";
const PTR_SIGNATURE: &str = "J";
const TYPE_CLASS: &str = "org/georust/proj/PJ$Type";
const TYPE_SIGNATURE: &str = "Lorg/georust/proj/PJ$Type;";
const TRANSFORM_EXCEPTION: &str = "org/georust/proj/TransformException";

static BACKEND: OnceLock<Option<Arc<dyn Backend>>> = OnceLock::new();

fn backend() -> Option<&'static Arc<dyn Backend>> {
    BACKEND
        .get_or_init(|| match Config::from_env().backend() {
            Ok(backend) => {
                tracing::debug!(backend = backend.name(), "selected backend for JVM exports");
                Some(backend)
            }
            Err(error) => {
                tracing::warn!(%error, "no PROJ backend available to the JVM");
                None
            }
        })
        .as_ref()
}

fn to_jlong(handle: RawHandle) -> jlong {
    handle.as_ptr() as usize as jlong
}

fn from_jlong(value: jlong) -> Option<RawHandle> {
    NonNull::new(value as usize as *mut c_void)
}

/// The `ptr` field of a Java `PJ`.
struct JavaField<'a, 'local, 'obj> {
    env: &'a mut JNIEnv<'local>,
    object: &'a JObject<'obj>,
}

impl JavaField<'_, '_, '_> {
    fn clear_exception(&mut self) {
        if self.env.exception_check().unwrap_or(false) {
            let _ = self.env.exception_clear();
        }
    }
}

impl HandleSlot for JavaField<'_, '_, '_> {
    fn load(&mut self) -> Option<RawHandle> {
        if self.object.is_null() {
            return None;
        }
        match self
            .env
            .get_field(self.object, PTR_FIELD, PTR_SIGNATURE)
            .and_then(|value| value.j())
        {
            Ok(value) => from_jlong(value),
            Err(_) => {
                self.clear_exception();
                None
            }
        }
    }

    fn take(&mut self) -> Option<RawHandle> {
        let handle = self.load()?;
        match self
            .env
            .set_field(self.object, PTR_FIELD, PTR_SIGNATURE, JValue::Long(0))
        {
            Ok(()) => Some(handle),
            Err(_) => {
                // a handle that could not be unlinked from its object must not be freed
                self.clear_exception();
                None
            }
        }
    }
}

fn view(env: &mut JNIEnv<'_>, object: &JObject<'_>) -> Option<PjRef<'static>> {
    let backend = backend()?;
    let handle = JavaField { env, object }.load()?;
    Some(unsafe { PjRef::new(&**backend, handle) })
}

fn new_string(env: &mut JNIEnv<'_>, value: Option<String>) -> jstring {
    value
        .and_then(|value| env.new_string(value).ok())
        .map_or(ptr::null_mut(), |s| s.into_raw())
}

fn exception_class(error: &TransformError) -> &'static str {
    match error {
        TransformError::MissingArgument(_) => "java/lang/NullPointerException",
        TransformError::IllegalArgument(_) | TransformError::MismatchedBackends => {
            "java/lang/IllegalArgumentException"
        }
        TransformError::OutOfBounds { .. } => "java/lang/ArrayIndexOutOfBoundsException",
        TransformError::Failed(_) => TRANSFORM_EXCEPTION,
    }
}

fn throw(env: &mut JNIEnv<'_>, error: &TransformError) {
    if env.exception_check().unwrap_or(false) {
        let _ = env.exception_clear();
    }
    if let Err(e) = env.throw_new(exception_class(error), error.to_string()) {
        tracing::warn!(error = %e, "unable to throw {}", exception_class(error));
    }
}

#[unsafe(no_mangle)]
pub extern "system" fn Java_org_georust_proj_PJ_getVersion<'local>(
    mut env: JNIEnv<'local>,
    _class: JClass<'local>,
) -> jstring {
    let release = backend().and_then(|backend| backend.library_release());
    new_string(&mut env, release)
}

#[unsafe(no_mangle)]
pub extern "system" fn Java_org_georust_proj_PJ_allocatePJ<'local>(
    mut env: JNIEnv<'local>,
    _class: JClass<'local>,
    definition: JString<'local>,
) -> jlong {
    let Some(backend) = backend() else {
        return 0;
    };
    if definition.is_null() {
        return 0;
    }
    let definition: String = match env.get_string(&definition) {
        Ok(definition) => definition.into(),
        Err(_) => {
            let _ = env.exception_clear();
            return 0;
        }
    };
    Pj::new(backend.clone(), &definition)
        .ok()
        .and_then(Pj::into_raw)
        .map_or(0, to_jlong)
}

#[unsafe(no_mangle)]
pub extern "system" fn Java_org_georust_proj_PJ_allocateGeoPJ<'local>(
    mut env: JNIEnv<'local>,
    _class: JClass<'local>,
    projected: JObject<'local>,
) -> jlong {
    let Some(projected) = view(&mut env, &projected) else {
        return 0;
    };
    match projected.geographic() {
        Ok(handle) => to_jlong(handle),
        Err(error) => {
            tracing::warn!(%error, "unable to derive geographic CRS");
            0
        }
    }
}

#[unsafe(no_mangle)]
pub extern "system" fn Java_org_georust_proj_PJ_getCode<'local>(
    mut env: JNIEnv<'local>,
    this: JObject<'local>,
) -> jstring {
    let code = view(&mut env, &this).and_then(|pj| pj.definition());
    new_string(&mut env, code)
}

#[unsafe(no_mangle)]
pub extern "system" fn Java_org_georust_proj_PJ_getName<'local>(
    mut env: JNIEnv<'local>,
    this: JObject<'local>,
) -> jstring {
    let name = view(&mut env, &this).and_then(|pj| pj.name());
    new_string(&mut env, name)
}

/// The matching `PJ.Type` constant, or `null`.
#[unsafe(no_mangle)]
pub extern "system" fn Java_org_georust_proj_PJ_getType<'local>(
    mut env: JNIEnv<'local>,
    this: JObject<'local>,
) -> jobject {
    let Some(pj) = view(&mut env, &this) else {
        return ptr::null_mut();
    };
    match env
        .get_static_field(TYPE_CLASS, pj.crs_type().name(), TYPE_SIGNATURE)
        .and_then(|value| value.l())
    {
        Ok(constant) => constant.into_raw(),
        Err(_) => {
            let _ = env.exception_clear();
            ptr::null_mut()
        }
    }
}

#[unsafe(no_mangle)]
pub extern "system" fn Java_org_georust_proj_PJ_getSemiMajorAxis<'local>(
    mut env: JNIEnv<'local>,
    this: JObject<'local>,
) -> jdouble {
    view(&mut env, &this).map_or(f64::NAN, |pj| pj.semi_major_axis())
}

#[unsafe(no_mangle)]
pub extern "system" fn Java_org_georust_proj_PJ_getSemiMinorAxis<'local>(
    mut env: JNIEnv<'local>,
    this: JObject<'local>,
) -> jdouble {
    view(&mut env, &this).map_or(f64::NAN, |pj| pj.semi_minor_axis())
}

#[unsafe(no_mangle)]
pub extern "system" fn Java_org_georust_proj_PJ_getEccentricitySquared<'local>(
    mut env: JNIEnv<'local>,
    this: JObject<'local>,
) -> jdouble {
    view(&mut env, &this).map_or(f64::NAN, |pj| pj.eccentricity_squared())
}

#[unsafe(no_mangle)]
pub extern "system" fn Java_org_georust_proj_PJ_getAxisDirections<'local>(
    mut env: JNIEnv<'local>,
    this: JObject<'local>,
) -> jcharArray {
    let Some(directions) = view(&mut env, &this).and_then(|pj| pj.axis_directions()) else {
        return ptr::null_mut();
    };
    let chars: Vec<u16> = directions.encode_utf16().collect();
    let Ok(length) = jsize::try_from(chars.len()) else {
        return ptr::null_mut();
    };
    let array = match env.new_char_array(length) {
        Ok(array) => array,
        Err(_) => return ptr::null_mut(),
    };
    if env.set_char_array_region(&array, 0, &chars).is_err() {
        return ptr::null_mut();
    }
    array.into_raw()
}

#[unsafe(no_mangle)]
pub extern "system" fn Java_org_georust_proj_PJ_getGreenwichLongitude<'local>(
    mut env: JNIEnv<'local>,
    this: JObject<'local>,
) -> jdouble {
    view(&mut env, &this).map_or(f64::NAN, |pj| pj.prime_meridian())
}

#[unsafe(no_mangle)]
pub extern "system" fn Java_org_georust_proj_PJ_getLinearUnitToMetre<'local>(
    mut env: JNIEnv<'local>,
    this: JObject<'local>,
    vertical: jboolean,
) -> jdouble {
    view(&mut env, &this).map_or(f64::NAN, |pj| pj.linear_unit_to_metre(vertical != 0))
}

#[unsafe(no_mangle)]
pub extern "system" fn Java_org_georust_proj_PJ_getLastError<'local>(
    mut env: JNIEnv<'local>,
    this: JObject<'local>,
) -> jstring {
    let error = view(&mut env, &this).and_then(|pj| pj.last_error());
    new_string(&mut env, error)
}

#[unsafe(no_mangle)]
pub extern "system" fn Java_org_georust_proj_PJ_transform<'local>(
    mut env: JNIEnv<'local>,
    this: JObject<'local>,
    target: JObject<'local>,
    dimension: jint,
    coordinates: JDoubleArray<'local>,
    offset: jint,
    num_pts: jint,
) {
    if let Err(error) = transform_array(&mut env, &this, &target, dimension, &coordinates, offset, num_pts) {
        throw(&mut env, &error);
    }
}

fn transform_array(
    env: &mut JNIEnv<'_>,
    this: &JObject<'_>,
    target: &JObject<'_>,
    dimension: jint,
    coordinates: &JDoubleArray<'_>,
    offset: jint,
    num_pts: jint,
) -> Result<(), TransformError> {
    let buffer_len = if coordinates.is_null() {
        None
    } else {
        let length = env
            .get_array_length(coordinates)
            .map_err(|e| TransformError::Failed(e.to_string()))?;
        Some(usize::try_from(length).unwrap_or(0))
    };
    let span = transform::validate(
        !target.is_null(),
        buffer_len,
        dimension.into(),
        offset.into(),
        num_pts.into(),
    )?;
    let Some(backend) = backend() else {
        return Ok(());
    };
    let source = JavaField { env: &mut *env, object: this }.load();
    let target = JavaField { env: &mut *env, object: target }.load();
    let (Some(source), Some(target)) = (source, target) else {
        return Ok(());
    };
    let mut prepared = unsafe { PreparedTransform::new(&**backend, source, target)? };
    let status = {
        // critical section: nothing in here may call back into the JVM
        let mut elements = unsafe { env.get_array_elements_critical(coordinates, ReleaseMode::CopyBack) }
            .map_err(|e| TransformError::Failed(e.to_string()))?;
        prepared.run(&mut elements[..], span)?
    };
    prepared.finish(status)
}

#[unsafe(no_mangle)]
pub extern "system" fn Java_org_georust_proj_PJ_finalize<'local>(
    mut env: JNIEnv<'local>,
    this: JObject<'local>,
) {
    let Some(backend) = backend() else {
        return;
    };
    let mut field = JavaField {
        env: &mut env,
        object: &this,
    };
    unsafe { release_slot(&**backend, &mut field) };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jlong_round_trip() {
        let mut value = 7u64;
        let handle = NonNull::from(&mut value).cast::<c_void>();
        assert_eq!(from_jlong(to_jlong(handle)), Some(handle));
        assert_eq!(from_jlong(0), None);
    }

    #[test]
    fn test_exception_classes() {
        assert_eq!(
            exception_class(&TransformError::MissingArgument("target")),
            "java/lang/NullPointerException"
        );
        assert_eq!(
            exception_class(&TransformError::IllegalArgument(1)),
            "java/lang/IllegalArgumentException"
        );
        assert_eq!(
            exception_class(&TransformError::OutOfBounds {
                offset: 5,
                dimension: 2,
                num_pts: 3,
                len: 10
            }),
            "java/lang/ArrayIndexOutOfBoundsException"
        );
        assert_eq!(
            exception_class(&TransformError::Failed(String::new())),
            TRANSFORM_EXCEPTION
        );
    }

    #[cfg(all(feature = "jvm-tests", feature = "linked"))]
    mod jvm {
        use super::*;
        use approx::assert_relative_eq;
        use jni::objects::GlobalRef;
        use jni::{InitArgsBuilder, JNIVersion, JavaVM};

        const CLASS: &str = "org/georust/proj/PJ";

        /// Class file bytes for `public class org.georust.proj.PJ { long ptr; }`.
        fn class_file() -> Vec<u8> {
            fn utf8(bytes: &mut Vec<u8>, text: &str) {
                bytes.push(1);
                bytes.extend((text.len() as u16).to_be_bytes());
                bytes.extend(text.as_bytes());
            }
            // magic, version 52.0, seven constant pool slots
            let mut bytes = vec![0xCA, 0xFE, 0xBA, 0xBE, 0, 0, 0, 52, 0, 7];
            utf8(&mut bytes, CLASS);
            bytes.extend([7, 0, 1]);
            utf8(&mut bytes, "java/lang/Object");
            bytes.extend([7, 0, 3]);
            utf8(&mut bytes, PTR_FIELD);
            utf8(&mut bytes, PTR_SIGNATURE);
            // public super, this #2, super #4, no interfaces
            bytes.extend([0, 0x21, 0, 2, 0, 4, 0, 0]);
            // one field: no flags, name #5, descriptor #6, no attributes
            bytes.extend([0, 1, 0, 0, 0, 5, 0, 6, 0, 0]);
            // no methods, no attributes
            bytes.extend([0, 0, 0, 0]);
            bytes
        }

        struct Jvm {
            vm: JavaVM,
            class: GlobalRef,
        }

        fn jvm() -> &'static Jvm {
            static JVM: OnceLock<Jvm> = OnceLock::new();
            JVM.get_or_init(|| {
                let args = InitArgsBuilder::new().version(JNIVersion::V8).build().unwrap();
                let vm = JavaVM::new(args).unwrap();
                let class = {
                    let mut env = vm.attach_current_thread().unwrap();
                    let class = env.define_class(CLASS, &JObject::null(), &class_file()).unwrap();
                    env.new_global_ref(class).unwrap()
                };
                Jvm { vm, class }
            })
        }

        fn allocate(env: &mut JNIEnv<'_>, definition: &str) -> jlong {
            let definition = env.new_string(definition).unwrap();
            let handle = Java_org_georust_proj_PJ_allocatePJ(
                unsafe { env.unsafe_clone() },
                JClass::from(JObject::null()),
                definition,
            );
            assert_ne!(handle, 0);
            handle
        }

        fn new_pj<'local>(env: &mut JNIEnv<'local>, handle: jlong) -> JObject<'local> {
            let class = JClass::from(env.new_local_ref(jvm().class.as_obj()).unwrap());
            let object = env.alloc_object(&class).unwrap();
            env.set_field(&object, PTR_FIELD, PTR_SIGNATURE, JValue::Long(handle))
                .unwrap();
            object
        }

        fn ptr_of(env: &mut JNIEnv<'_>, object: &JObject<'_>) -> jlong {
            env.get_field(object, PTR_FIELD, PTR_SIGNATURE)
                .and_then(|value| value.j())
                .unwrap()
        }

        fn finalize(env: &mut JNIEnv<'_>, object: &JObject<'_>) {
            let this = unsafe { JObject::from_raw(object.as_raw()) };
            Java_org_georust_proj_PJ_finalize(unsafe { env.unsafe_clone() }, this);
        }

        #[test]
        fn test_finalize_zeroes_field() {
            let mut env = jvm().vm.attach_current_thread().unwrap();
            let handle = allocate(&mut env, "+proj=merc +ellps=WGS84");
            let pj = new_pj(&mut env, handle);

            let loaded = JavaField { env: &mut env, object: &pj }.load();
            assert_eq!(loaded, from_jlong(handle));

            finalize(&mut env, &pj);
            assert_eq!(ptr_of(&mut env, &pj), 0);
            assert_eq!(JavaField { env: &mut env, object: &pj }.load(), None);
            // a second release finds nothing to free
            finalize(&mut env, &pj);
            assert_eq!(ptr_of(&mut env, &pj), 0);
            assert!(!env.exception_check().unwrap());
        }

        #[test]
        fn test_transform_checks_arguments_before_handles() {
            let mut env = jvm().vm.attach_current_thread().unwrap();
            let released = new_pj(&mut env, 0);
            let handle = allocate(&mut env, "+proj=merc +ellps=WGS84");
            let merc = new_pj(&mut env, handle);
            let array = env.new_double_array(2).unwrap();
            env.set_double_array_region(&array, 0, &[1.0, 2.0]).unwrap();

            assert_eq!(
                transform_array(&mut env, &released, &JObject::null(), 2, &array, 0, 1),
                Err(TransformError::MissingArgument("target"))
            );
            assert_eq!(
                transform_array(&mut env, &released, &merc, 1, &array, 0, 1),
                Err(TransformError::IllegalArgument(1))
            );
            assert!(matches!(
                transform_array(&mut env, &released, &merc, 2, &array, 0, 2),
                Err(TransformError::OutOfBounds { .. })
            ));
            assert_eq!(transform_array(&mut env, &released, &merc, 2, &array, 0, 1), Ok(()));

            let mut values = [0.0; 2];
            env.get_double_array_region(&array, 0, &mut values).unwrap();
            assert_eq!(values, [1.0, 2.0]);
            finalize(&mut env, &merc);
        }

        #[test]
        fn test_transform_array_in_place() {
            let mut env = jvm().vm.attach_current_thread().unwrap();
            let handle = allocate(&mut env, "+proj=longlat +ellps=WGS84");
            let geo = new_pj(&mut env, handle);
            let handle = allocate(&mut env, "+proj=merc +ellps=WGS84");
            let merc = new_pj(&mut env, handle);
            let array = env.new_double_array(3).unwrap();
            env.set_double_array_region(&array, 0, &[-1.0, 1.0, 0.0]).unwrap();

            assert_eq!(transform_array(&mut env, &geo, &merc, 2, &array, 1, 1), Ok(()));
            let mut values = [0.0; 3];
            env.get_double_array_region(&array, 0, &mut values).unwrap();
            assert_eq!(values[0], -1.0);
            assert_relative_eq!(values[1], 111_319.490_793_273_57, epsilon = 1e-3);
            assert_relative_eq!(values[2], 0.0, epsilon = 1e-6);

            finalize(&mut env, &geo);
            finalize(&mut env, &merc);
        }
    }
}
